use serde::{Deserialize, Serialize};

use crate::error::{FlightError, Result};

/// Fixed-capacity circular store of the most recent samples
///
/// All `capacity` slots are allocated up front with `T::default()`. `current_index` stays
/// `None` until the first write, then advances `(i + 1) % capacity` on every write.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingBuffer<T> {
    current_index: Option<usize>,
    values: Vec<T>,
}

impl<T: Default + Clone> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(FlightError::InvalidParameters(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        Ok(RollingBuffer {
            current_index: None,
            values: vec![T::default(); capacity],
        })
    }
}

impl<T> RollingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn is_empty(&self) -> bool {
        self.current_index.is_none()
    }

    /// Move to the next slot and hand it out for writing.
    pub fn advance(&mut self) -> &mut T {
        let next = match self.current_index {
            None => 0,
            Some(i) => (i + 1) % self.values.len(),
        };
        self.current_index = Some(next);
        &mut self.values[next]
    }

    pub fn current(&self) -> Option<&T> {
        self.current_index.map(|i| &self.values[i])
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        match self.current_index {
            Some(i) => Some(&mut self.values[i]),
            None => None,
        }
    }

    /// Raw slot storage, in slot order.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Every slot starting from the current one and walking backwards. Slots not yet written
    /// still hold `T::default()`.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.values.len();
        let (start, count) = match self.current_index {
            Some(i) => (i, len),
            None => (0, 0),
        };
        (0..count).map(move |back| &self.values[(start + len - back) % len])
    }
}

/// Client-side view of a serialised `RollingBuffer`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSnapshot<T> {
    pub current_index: Option<usize>,
    pub values: Vec<T>,
}

impl<T> BufferSnapshot<T> {
    pub fn current(&self) -> Option<&T> {
        self.current_index.and_then(|i| self.values.get(i))
    }

    pub fn into_current(self) -> Option<T> {
        let index = self.current_index?;
        self.values.into_iter().nth(index)
    }
}
