//! # Sliding-Window Limiter
//!
//! Counts how often each facet was seen within the last `window`. A facet seen
//! more than `max` times in that window is limited until enough old hits slide
//! out. Keys with no hits left in the window are evicted on the next sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{LimitDecision, Limiter, LimiterError};

#[derive(Debug, Default)]
struct FacetState {
    hits: VecDeque<Instant>,
    limited: bool,
}

/// Per-facet sliding-window counter.
pub struct SlidingWindowLimiter {
    max: usize,
    window: Duration,
    facets: Mutex<HashMap<String, FacetState>>,
    last_sweep: Mutex<Option<Instant>>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter allowing `max` hits per facet within `window`.
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            facets: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(None),
        }
    }

    /// Number of facets currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.facets.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// [`Limiter::decide`] with an explicit clock.
    pub fn decide_at(&self, facets: &[String], now: Instant) -> Result<LimitDecision, LimiterError> {
        let mut state = self
            .facets
            .lock()
            .map_err(|_| LimiterError::Unavailable("facet table lock poisoned".to_string()))?;

        let mut newly_limited = false;
        let mut limited_keys = Vec::new();

        for facet in facets {
            let entry = state.entry(facet.clone()).or_default();
            expire(&mut entry.hits, now, self.window);
            entry.hits.push_back(now);

            if entry.hits.len() > self.max {
                if !entry.limited {
                    entry.limited = true;
                    newly_limited = true;
                }
                limited_keys.push(facet.clone());
            } else {
                entry.limited = false;
            }
        }

        self.sweep(&mut state, now);

        Ok(if newly_limited {
            LimitDecision::InitiateLimiting { limited_keys }
        } else if !limited_keys.is_empty() {
            LimitDecision::ContinueLimiting
        } else {
            LimitDecision::DoNotLimit
        })
    }

    /// Drops keys whose window has emptied, at most once per window.
    fn sweep(&self, state: &mut HashMap<String, FacetState>, now: Instant) {
        let Ok(mut last) = self.last_sweep.lock() else {
            return;
        };
        let due = match *last {
            Some(at) => now.saturating_duration_since(at) >= self.window,
            None => true,
        };
        if !due {
            return;
        }
        *last = Some(now);

        let window = self.window;
        state.retain(|_, entry| {
            expire(&mut entry.hits, now, window);
            !entry.hits.is_empty()
        });
    }
}

impl Limiter for SlidingWindowLimiter {
    fn decide(&self, facets: &[String]) -> Result<LimitDecision, LimiterError> {
        self.decide_at(facets, Instant::now())
    }
}

fn expire(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
