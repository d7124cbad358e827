use std::collections::VecDeque;

use airbrake_guidance_core::{Alert, StatusIndicator};
use log::{info, trace, warn};

/// `repeats` beeps of `on_ms`, separated by equally long silences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepPattern {
    pub on_ms: u32,
    pub repeats: u8,
}

pub const SUCCESS: BeepPattern = BeepPattern {
    on_ms: 1000,
    repeats: 1,
};

pub const FAILURE: BeepPattern = BeepPattern {
    on_ms: 200,
    repeats: 3,
};

impl BeepPattern {
    pub fn for_alert(alert: Alert) -> Option<Self> {
        match alert {
            Alert::InitSucceeded => Some(SUCCESS),
            Alert::InitFailed | Alert::SensorFault(_) | Alert::EstimatorDegraded => Some(FAILURE),
            Alert::PhaseChanged(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Playing {
    pattern: BeepPattern,
    /// on/off edges left after the current one
    edges_left: u32,
    next_edge_us: u64,
}

/// Piezo buzzer serviced from the host loop between guidance cycles.
#[derive(Debug, Default)]
pub struct Buzzer {
    queue: VecDeque<BeepPattern>,
    playing: Option<Playing>,
    on: bool,
    beeps: u32,
    alerts: Vec<Alert>,
}

impl Buzzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, now_us: u64) {
        match self.playing {
            None => {
                if let Some(pattern) = self.queue.pop_front() {
                    self.start(pattern, now_us);
                }
            }
            Some(mut playing) if now_us >= playing.next_edge_us => {
                if playing.edges_left == 0 {
                    self.set_on(false);
                    self.playing = None;
                    return;
                }
                playing.edges_left -= 1;
                playing.next_edge_us = now_us + playing.pattern.on_ms as u64 * 1_000;
                self.set_on(!self.on);
                self.playing = Some(playing);
            }
            Some(_) => {}
        }
    }

    fn start(&mut self, pattern: BeepPattern, now_us: u64) {
        if pattern.repeats == 0 {
            return;
        }
        self.playing = Some(Playing {
            pattern,
            edges_left: pattern.repeats as u32 * 2 - 1,
            next_edge_us: now_us + pattern.on_ms as u64 * 1_000,
        });
        self.set_on(true);
    }

    fn set_on(&mut self, on: bool) {
        if on && !self.on {
            self.beeps += 1;
        }
        if on != self.on {
            trace!("buzzer {}", if on { "on" } else { "off" });
        }
        self.on = on;
    }

    pub fn is_idle(&self) -> bool {
        self.playing.is_none() && self.queue.is_empty()
    }

    pub fn beeps(&self) -> u32 {
        self.beeps
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }
}

impl StatusIndicator for Buzzer {
    fn alert(&mut self, alert: Alert) {
        match alert {
            Alert::InitSucceeded | Alert::PhaseChanged(_) => info!("alert: {:?}", alert),
            _ => warn!("alert: {:?}", alert),
        }
        self.alerts.push(alert);
        if let Some(pattern) = BeepPattern::for_alert(alert) {
            self.queue.push_back(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use airbrake_guidance_core::FlightPhase;

    use super::*;

    fn run_until_idle(buzzer: &mut Buzzer) -> Vec<(u64, bool)> {
        let mut edges = Vec::new();
        let mut was_on = buzzer.on;
        let mut now_us = 0;
        while !buzzer.is_idle() && now_us < 10_000_000 {
            buzzer.tick(now_us);
            if buzzer.on != was_on {
                was_on = buzzer.on;
                edges.push((now_us, was_on));
            }
            now_us += 1_000;
        }
        edges
    }

    #[test]
    fn success_is_one_long_beep() {
        let mut buzzer = Buzzer::new();
        buzzer.alert(Alert::InitSucceeded);

        let edges = run_until_idle(&mut buzzer);
        assert_eq!(edges, [(0, true), (1_000_000, false)]);
        assert_eq!(buzzer.beeps(), 1);
    }

    #[test]
    fn failure_is_three_short_beeps() {
        let mut buzzer = Buzzer::new();
        buzzer.alert(Alert::InitFailed);

        let edges = run_until_idle(&mut buzzer);
        assert_eq!(edges.len(), 6);
        assert_eq!(edges[1], (200_000, false));
        assert_eq!(edges[4], (800_000, true));
        assert_eq!(edges[5], (1_000_000, false));
        assert_eq!(buzzer.beeps(), 3);
    }

    #[test]
    fn patterns_play_in_order_and_phase_changes_are_silent() {
        let mut buzzer = Buzzer::new();
        buzzer.alert(Alert::InitSucceeded);
        buzzer.alert(Alert::PhaseChanged(FlightPhase::Boost));
        buzzer.alert(Alert::EstimatorDegraded);

        run_until_idle(&mut buzzer);
        assert_eq!(buzzer.beeps(), 4);
        assert_eq!(buzzer.alerts().len(), 3);
        assert!(!buzzer.on);
    }
}
