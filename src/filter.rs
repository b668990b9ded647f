//! Change filter over per-slider state
//!
//! The device re-reports every slider on each poll, so an idle box sends the
//! same line over and over. Only readings that differ from the last applied
//! value are forwarded to the dispatcher.

/// A slider whose reading changed since the last cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliderDelta {
    pub index: usize,
    pub value: i32,
}

/// Last applied level per slider index. `None` means unknown, which forces
/// the next reading for that index through.
#[derive(Debug, Default, Clone)]
pub struct ChangeFilter {
    state: Vec<Option<i32>>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare readings against the slider state, returning deltas in
    /// ascending slider-index order and recording the new values.
    pub fn apply(&mut self, readings: &[i32]) -> Vec<SliderDelta> {
        if self.state.len() < readings.len() {
            self.state.resize(readings.len(), None);
        }

        readings
            .iter()
            .enumerate()
            .filter_map(|(index, &value)| {
                let slot = &mut self.state[index];
                if *slot == Some(value) {
                    return None;
                }
                *slot = Some(value);
                Some(SliderDelta { index, value })
            })
            .collect()
    }

    /// Last applied value for a slider, if any
    pub fn last(&self, index: usize) -> Option<i32> {
        self.state.get(index).copied().flatten()
    }
}
