//! Scroll intent tracking.
//!
//! The view follows new messages until the user scrolls away from the
//! bottom by at least the threshold distance. The threshold is an absolute
//! distance so the behavior does not depend on the container size.

use serde::{Deserialize, Serialize};

/// Default distance from the bottom at which the view stops following.
pub const DEFAULT_SCROLL_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollIntent {
    /// Auto-scroll on new messages
    #[default]
    Following,
    /// User scrolled away; append silently
    Pinned,
}

#[derive(Debug, Clone)]
pub struct ScrollTracker {
    intent: ScrollIntent,
    threshold: f64,
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_THRESHOLD)
    }
}

impl ScrollTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            intent: ScrollIntent::Following,
            threshold,
        }
    }

    /// Record a viewport scroll event.
    pub fn on_scroll(
        &mut self,
        scroll_top: f64,
        scroll_height: f64,
        client_height: f64,
    ) -> ScrollIntent {
        let distance_from_bottom = scroll_height - scroll_top - client_height;
        self.intent = if distance_from_bottom < self.threshold {
            ScrollIntent::Following
        } else {
            ScrollIntent::Pinned
        };
        self.intent
    }

    pub fn intent(&self) -> ScrollIntent {
        self.intent
    }

    pub fn should_auto_scroll(&self) -> bool {
        self.intent == ScrollIntent::Following
    }

    /// The "scroll to bottom" affordance is offered while pinned.
    pub fn show_jump_button(&self) -> bool {
        self.intent == ScrollIntent::Pinned
    }

    /// Explicit jump to the latest message: resume following.
    pub fn jump_to_latest(&mut self) {
        self.intent = ScrollIntent::Following;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_following() {
        let tracker = ScrollTracker::default();
        assert!(tracker.should_auto_scroll());
        assert!(!tracker.show_jump_button());
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let mut tracker = ScrollTracker::default();

        // 1000 - 800 - 100 = 100 → pinned
        assert_eq!(tracker.on_scroll(800.0, 1000.0, 100.0), ScrollIntent::Pinned);
        assert!(!tracker.should_auto_scroll());

        // 99.5 away → following
        tracker.on_scroll(800.5, 1000.0, 100.0);
        assert!(tracker.should_auto_scroll());
    }

    #[test]
    fn sampled_triples_match_distance_rule() {
        let mut tracker = ScrollTracker::default();
        let samples = [
            (0.0, 500.0, 500.0),
            (0.0, 5000.0, 500.0),
            (4400.0, 5000.0, 500.0),
            (4401.0, 5000.0, 500.0),
            (4399.0, 5000.0, 500.0),
            (120.0, 300.0, 80.0),
            (10.0, 100.0, 100.0),
        ];
        for (top, height, client) in samples {
            tracker.on_scroll(top, height, client);
            let expected = height - top - client < 100.0;
            assert_eq!(
                tracker.should_auto_scroll(),
                expected,
                "top={top} height={height} client={client}"
            );
        }
    }

    #[test]
    fn independent_of_container_size() {
        let mut small = ScrollTracker::default();
        let mut large = ScrollTracker::default();
        small.on_scroll(150.0, 400.0, 200.0); // 50 away
        large.on_scroll(9_750.0, 10_000.0, 200.0); // 50 away
        assert_eq!(small.intent(), large.intent());
        assert!(small.should_auto_scroll());
    }

    #[test]
    fn jump_to_latest_forces_following() {
        let mut tracker = ScrollTracker::default();
        tracker.on_scroll(0.0, 2000.0, 400.0);
        assert!(tracker.show_jump_button());

        tracker.jump_to_latest();
        assert_eq!(tracker.intent(), ScrollIntent::Following);
        assert!(!tracker.show_jump_button());
    }

    #[test]
    fn custom_threshold() {
        let mut tracker = ScrollTracker::new(24.0);
        tracker.on_scroll(0.0, 130.0, 100.0); // 30 away
        assert!(!tracker.should_auto_scroll());
    }
}
