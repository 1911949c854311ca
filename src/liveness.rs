//! Per-camera heartbeat tracking.
//!
//! The tracker records the last heartbeat time of every camera and toggles
//! an active flag on each sweep. Inactivity is advisory: cameras are never
//! deleted here, they are only hidden from downstream search results until
//! they heartbeat again.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
struct HeartbeatState {
    last_heartbeat_s: u64,
    active: bool,
}

#[derive(Default)]
pub struct LivenessTracker {
    states: HashMap<String, HeartbeatState>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat at `now_s` (epoch seconds) and mark the camera
    /// active immediately, regardless of how long it was silent.
    pub fn touch(&mut self, camera: &str, now_s: u64) {
        self.states.insert(
            camera.to_string(),
            HeartbeatState {
                last_heartbeat_s: now_s,
                active: true,
            },
        );
    }

    /// Re-evaluate every tracked camera: inactive iff the last heartbeat is
    /// older than `timeout`, active otherwise.
    pub fn sweep(&mut self, now_s: u64, timeout: Duration) {
        for (camera, state) in &mut self.states {
            let silent_s = now_s.saturating_sub(state.last_heartbeat_s);
            let alive = silent_s <= timeout.as_secs();
            if state.active && !alive {
                log::info!("camera {} went silent ({}s since heartbeat)", camera, silent_s);
            } else if !state.active && alive {
                log::info!("camera {} is back", camera);
            }
            state.active = alive;
        }
    }

    /// Untracked cameras are never active.
    pub fn is_active(&self, camera: &str) -> bool {
        self.states.get(camera).is_some_and(|s| s.active)
    }

    pub fn last_heartbeat_s(&self, camera: &str) -> Option<u64> {
        self.states.get(camera).map(|s| s.last_heartbeat_s)
    }

    pub fn remove(&mut self, camera: &str) {
        self.states.remove(camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn sweep_ages_out_silent_cameras() {
        let mut tracker = LivenessTracker::new();
        tracker.touch("cam-a", 100);
        tracker.touch("cam-b", 100);
        assert!(tracker.is_active("cam-a"));

        tracker.touch("cam-b", 108);
        tracker.sweep(111, TIMEOUT);
        assert!(!tracker.is_active("cam-a"));
        assert!(tracker.is_active("cam-b"));

        // aging out does not forget the camera
        assert_eq!(tracker.last_heartbeat_s("cam-a"), Some(100));
    }

    #[test]
    fn heartbeat_reactivates_immediately() {
        let mut tracker = LivenessTracker::new();
        tracker.touch("cam", 0);
        tracker.sweep(1_000_000, TIMEOUT);
        assert!(!tracker.is_active("cam"));

        // active again right after the heartbeat, before any sweep
        tracker.touch("cam", 1_000_000);
        assert!(tracker.is_active("cam"));
        tracker.sweep(1_000_005, TIMEOUT);
        assert!(tracker.is_active("cam"));
    }

    #[test]
    fn exactly_at_timeout_is_still_alive() {
        let mut tracker = LivenessTracker::new();
        tracker.touch("cam", 100);
        tracker.sweep(110, TIMEOUT);
        assert!(tracker.is_active("cam"));
        tracker.sweep(111, TIMEOUT);
        assert!(!tracker.is_active("cam"));
    }

    #[test]
    fn unknown_cameras_are_inactive() {
        let tracker = LivenessTracker::new();
        assert!(!tracker.is_active("ghost"));
    }
}
