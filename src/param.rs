//! Scheduled, smoothed parameter automation
//!
//! Every audible parameter in the graph is a [`Param`]: a value that changes
//! only through scheduled events: immediate sets, linear/exponential ramps
//! toward a future time, or an exponential approach toward a target with a
//! time constant. The engine writes with tens-of-milliseconds smoothing
//! rather than instantaneous jumps, which is what keeps voice churn
//! click-free.
//!
//! There is a single writer (the engine), so scheduling an event at time `t`
//! discards anything previously scheduled at or after `t`.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
enum AutomationEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
    ExponentialRamp { value: f32, time: f64 },
    SetTarget { target: f32, time: f64, time_constant: f32 },
}

impl AutomationEvent {
    fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. }
            | AutomationEvent::LinearRamp { time, .. }
            | AutomationEvent::ExponentialRamp { time, .. }
            | AutomationEvent::SetTarget { time, .. } => time,
        }
    }
}

/// An automatable scalar parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Value and time of the last settled event.
    anchor_value: f32,
    anchor_time: f64,
    /// Active exponential approach, if any: (target, start time, time constant).
    target: Option<(f32, f64, f32)>,
    events: VecDeque<AutomationEvent>,
    current: f32,
}

impl Param {
    pub fn new(value: f32) -> Self {
        Self {
            anchor_value: value,
            anchor_time: 0.0,
            target: None,
            events: VecDeque::new(),
            current: value,
        }
    }

    /// The most recently evaluated value. Cheap; does not advance time.
    pub fn value(&self) -> f32 {
        self.current
    }

    /// Schedule an instantaneous set at `time`.
    pub fn set_value_at(&mut self, value: f32, time: f64) {
        self.push(AutomationEvent::SetValue { value, time });
    }

    /// Ramp linearly from the previous event's end to `value` at `time`.
    pub fn linear_ramp_to(&mut self, value: f32, time: f64) {
        self.push(AutomationEvent::LinearRamp { value, time });
    }

    /// Ramp geometrically from the previous event's end to `value` at `time`.
    /// Endpoints too close to zero fall back to a linear ramp.
    pub fn exponential_ramp_to(&mut self, value: f32, time: f64) {
        self.push(AutomationEvent::ExponentialRamp { value, time });
    }

    /// From `time` onward, approach `target` exponentially with the given
    /// time constant (~63% of the distance per constant).
    pub fn set_target(&mut self, target: f32, time: f64, time_constant: f32) {
        self.push(AutomationEvent::SetTarget {
            target,
            time,
            time_constant: time_constant.max(1e-4),
        });
    }

    /// Drop everything scheduled at or after `time`.
    pub fn cancel_after(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
        if let Some((_, start, _)) = self.target {
            if start >= time {
                self.target = None;
            }
        }
    }

    fn push(&mut self, event: AutomationEvent) {
        self.cancel_after(event.time());
        self.events.push_back(event);
    }

    /// Advance to `now` and return the evaluated value. `now` must be
    /// monotonically non-decreasing across calls.
    pub fn tick(&mut self, now: f64) -> f32 {
        // Settle every event whose time has arrived.
        while let Some(&ev) = self.events.front() {
            let t = ev.time();
            if t > now {
                break;
            }
            match ev {
                AutomationEvent::SetValue { value, .. }
                | AutomationEvent::LinearRamp { value, .. }
                | AutomationEvent::ExponentialRamp { value, .. } => {
                    self.anchor_value = value;
                    self.anchor_time = t;
                    self.target = None;
                }
                AutomationEvent::SetTarget {
                    target,
                    time_constant,
                    ..
                } => {
                    // The approach starts from wherever the value was when
                    // the event fired.
                    self.anchor_value = self.eval(t);
                    self.anchor_time = t;
                    self.target = Some((target, t, time_constant));
                }
            }
            self.events.pop_front();
        }

        // A pending ramp shapes the value before its end time.
        let value = match self.events.front() {
            Some(&AutomationEvent::LinearRamp { value, time }) => {
                let span = (time - self.anchor_time).max(1e-9);
                let frac = ((now - self.anchor_time) / span).clamp(0.0, 1.0) as f32;
                self.anchor_value + (value - self.anchor_value) * frac
            }
            Some(&AutomationEvent::ExponentialRamp { value, time }) => {
                let span = (time - self.anchor_time).max(1e-9);
                let frac = ((now - self.anchor_time) / span).clamp(0.0, 1.0) as f32;
                let v0 = self.anchor_value;
                let v1 = value;
                if v0 * v1 > 0.0 && v0.abs() > 1e-6 {
                    v0 * (v1 / v0).powf(frac)
                } else {
                    v0 + (v1 - v0) * frac
                }
            }
            _ => self.eval(now),
        };

        self.current = value;
        value
    }

    fn eval(&self, t: f64) -> f32 {
        match self.target {
            Some((target, start, tc)) => {
                let dt = (t - start).max(0.0) as f32;
                target + (self.anchor_value - target) * (-dt / tc).exp()
            }
            None => self.anchor_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_takes_effect_at_time() {
        let mut p = Param::new(1.0);
        p.set_value_at(5.0, 0.5);
        assert_eq!(p.tick(0.0), 1.0);
        assert_eq!(p.tick(0.4), 1.0);
        assert_eq!(p.tick(0.6), 5.0);
    }

    #[test]
    fn linear_ramp_hits_midpoint() {
        let mut p = Param::new(0.0);
        p.set_value_at(0.0, 0.0);
        p.linear_ramp_to(1.0, 1.0);
        assert!((p.tick(0.5) - 0.5).abs() < 1e-6);
        assert!((p.tick(1.0) - 1.0).abs() < 1e-6);
        assert!((p.tick(2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn exponential_ramp_is_geometric() {
        let mut p = Param::new(100.0);
        p.set_value_at(100.0, 0.0);
        p.exponential_ramp_to(1.0, 1.0);
        // Halfway through a 100 -> 1 geometric ramp sits at 10.
        assert!((p.tick(0.5) - 10.0).abs() < 0.01);
    }

    #[test]
    fn set_target_converges() {
        let mut p = Param::new(0.0);
        p.set_target(1.0, 0.0, 0.05);
        let one_tc = p.tick(0.05);
        assert!((one_tc - 0.632).abs() < 0.01, "got {}", one_tc);
        assert!((p.tick(1.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn later_schedule_cancels_pending() {
        let mut p = Param::new(0.0);
        p.linear_ramp_to(1.0, 1.0);
        p.set_value_at(3.0, 0.2);
        assert_eq!(p.tick(0.5), 3.0);
        assert_eq!(p.tick(1.5), 3.0);
    }

    #[test]
    fn retarget_folds_current_value() {
        let mut p = Param::new(0.0);
        p.set_target(1.0, 0.0, 0.02);
        p.tick(0.1); // nearly settled at 1
        p.set_target(0.0, 0.1, 0.02);
        let v = p.tick(0.1);
        assert!(v > 0.9, "approach restarts from the settled value, got {}", v);
        assert!(p.tick(1.0).abs() < 1e-4);
    }
}
