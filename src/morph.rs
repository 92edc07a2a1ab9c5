//! Time-driven morph target blending.
//!
//! [`MorphAnimator`] linearly interpolates a four-component weight vector from
//! a snapshot of the current weights to a one-hot target over a fixed
//! duration. It never reads a clock itself: every time-dependent call takes
//! `now`, a monotonic timestamp such as Bevy's `Time::elapsed()`.

use std::time::Duration;

use bevy::prelude::*;

use crate::error::{Error, Result};
use crate::mesher::MORPH_TARGET_COUNT;

/// Weights with target 0 fully applied.
pub const REST_WEIGHTS: [f32; MORPH_TARGET_COUNT] = [1.0, 0.0, 0.0, 0.0];

/// Notification emitted by a [`MorphAnimator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphEvent {
    /// A timed transition toward `target` started.
    Begin {
        /// Target morph index.
        target: usize,
    },
    /// A timed transition reached `target`.
    End {
        /// Target morph index.
        target: usize,
    },
}

/// Morph weight state machine: idle, morphing, or paused mid-transition.
///
/// Weights are an arbitrary linear combination; normalization is left to the
/// caller.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct MorphAnimator {
    start_weights: [f32; MORPH_TARGET_COUNT],
    end_weights: [f32; MORPH_TARGET_COUNT],
    current_weights: [f32; MORPH_TARGET_COUNT],
    target: usize,
    start_time: Duration,
    duration: Duration,
    /// Elapsed transition time frozen by a pause.
    paused_elapsed: Option<Duration>,
    morphing: bool,
    events: Vec<MorphEvent>,
}

impl Default for MorphAnimator {
    fn default() -> Self {
        Self {
            start_weights: REST_WEIGHTS,
            end_weights: REST_WEIGHTS,
            current_weights: REST_WEIGHTS,
            target: 0,
            start_time: Duration::ZERO,
            duration: Duration::ZERO,
            paused_elapsed: None,
            morphing: false,
            events: Vec::new(),
        }
    }
}

impl MorphAnimator {
    /// Creates an idle animator at [`REST_WEIGHTS`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current blend weights.
    pub fn weights(&self) -> [f32; MORPH_TARGET_COUNT] {
        self.current_weights
    }

    /// Index of the last requested target.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Whether a transition is running.
    pub fn is_morphing(&self) -> bool {
        self.morphing
    }

    /// Whether a transition is frozen by [`set_morphing(false)`](Self::set_morphing).
    pub fn is_paused(&self) -> bool {
        self.paused_elapsed.is_some()
    }

    /// Whether notifications are queued.
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Takes the queued notifications, oldest first.
    pub fn drain_events(&mut self) -> Vec<MorphEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts a transition to the one-hot weights of `target`.
    ///
    /// A non-positive (or unrepresentable) duration applies the target
    /// immediately and leaves the animator idle, with no notifications.
    /// Otherwise the current weights are snapshotted as the start and a
    /// [`MorphEvent::Begin`] is queued.
    pub fn morph_to(&mut self, target: usize, duration_secs: f32, now: Duration) -> Result<()> {
        if target >= MORPH_TARGET_COUNT {
            return Err(Error::SlotIndexOutOfRange { index: target });
        }
        let weights = one_hot(target);
        self.target = target;
        self.paused_elapsed = None;

        let duration = match Duration::try_from_secs_f32(duration_secs) {
            Ok(duration) if !duration.is_zero() => duration,
            _ => {
                self.start_weights = weights;
                self.end_weights = weights;
                self.current_weights = weights;
                self.morphing = false;
                return Ok(());
            }
        };

        self.start_weights = self.current_weights;
        self.end_weights = weights;
        self.start_time = now;
        self.duration = duration;
        self.morphing = true;
        self.events.push(MorphEvent::Begin { target });
        Ok(())
    }

    /// Advances a running transition to `now`.
    ///
    /// Past the full duration the weights snap to the target, the animator
    /// goes idle and a [`MorphEvent::End`] is queued. Does nothing unless
    /// morphing.
    pub fn tick(&mut self, now: Duration) {
        if !self.morphing {
            return;
        }
        let elapsed = now.saturating_sub(self.start_time);
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();

        if t > 1.0 {
            self.current_weights = self.end_weights;
            self.start_weights = self.current_weights;
            self.morphing = false;
            self.events.push(MorphEvent::End {
                target: self.target,
            });
            return;
        }

        for i in 0..MORPH_TARGET_COUNT {
            self.current_weights[i] = self.start_weights[i] * (1.0 - t) + self.end_weights[i] * t;
        }
    }

    /// Pauses (`false`) or resumes (`true`) a transition.
    ///
    /// Pausing freezes the weights and the elapsed time. Resuming shifts the
    /// start time so the remaining part of the duration is preserved. Either
    /// call is a no-op when there is nothing to pause or resume.
    pub fn set_morphing(&mut self, morphing: bool, now: Duration) {
        match (morphing, self.morphing, self.paused_elapsed) {
            (false, true, _) => {
                self.paused_elapsed = Some(now.saturating_sub(self.start_time));
                self.morphing = false;
            }
            (true, false, Some(elapsed)) => {
                self.start_time = now.saturating_sub(elapsed);
                self.paused_elapsed = None;
                self.morphing = true;
            }
            _ => {}
        }
    }
}

/// Weights selecting only `target`.
pub fn one_hot(target: usize) -> [f32; MORPH_TARGET_COUNT] {
    std::array::from_fn(|i| if i == target { 1.0 } else { 0.0 })
}
