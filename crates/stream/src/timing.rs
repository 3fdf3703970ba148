use std::collections::VecDeque;
use std::time::Duration;

/// Rolling window of loader pump durations.
#[derive(Debug, Clone)]
pub(crate) struct UpdateTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl UpdateTimer {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(dt);
    }

    pub(crate) fn average(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        self.window.iter().sum::<Duration>() / self.window.len() as u32
    }

    pub(crate) fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or(Duration::ZERO)
    }

}

impl Default for UpdateTimer {
    fn default() -> Self {
        Self::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_timer_reports_zero() {
        let timer = UpdateTimer::new(4);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.max(), Duration::ZERO);
    }

    #[test]
    fn window_drops_oldest() {
        let mut timer = UpdateTimer::new(2);
        timer.record(Duration::from_millis(30));
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));

        assert_eq!(timer.average(), Duration::from_millis(15));
        assert_eq!(timer.max(), Duration::from_millis(20));
    }
}
