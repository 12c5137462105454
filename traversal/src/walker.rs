//! Locality-biased movement of a page cursor between relationship reads.
//!
//! Relationship chains in a graph store are mostly, but not entirely, local:
//! after each read the walker either stays on the current page or jumps to a
//! page chosen uniformly from the whole store.

use std::io;

use page_cache::PageCursor;
use rand::Rng;

/// The walker's decision after a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Read the next record from the current page.
    Stay,
    /// The cursor was moved to a random page.
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Locality {
    stay_probability: f64,
}

impl Locality {
    /// Stay on the page 20% of the time, jump 80% of the time.
    pub const DEFAULT: Locality = Locality {
        stay_probability: 0.2,
    };

    /// `None` unless `stay_probability` is within `0..=1`.
    pub fn new(stay_probability: f64) -> Option<Self> {
        (0.0..=1.0)
            .contains(&stay_probability)
            .then_some(Locality { stay_probability })
    }

    pub fn stay_probability(&self) -> f64 {
        self.stay_probability
    }

    pub fn decide<R: Rng>(&self, rng: &mut R) -> Step {
        if rng.gen::<f64>() < 1.0 - self.stay_probability {
            Step::Jump
        } else {
            Step::Stay
        }
    }
}

impl Default for Locality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Decides where the next read happens, moving `cursor` to a page within
/// `0..=last_page_id` on a jump.
///
/// `last_page_id` should be read from the store right before the call so that
/// jumps cover the store's current extent.
pub fn next_page<C, R>(
    cursor: &mut C,
    last_page_id: u64,
    locality: Locality,
    rng: &mut R,
) -> io::Result<Step>
where
    C: PageCursor + ?Sized,
    R: Rng,
{
    let step = locality.decide(rng);
    if step == Step::Jump {
        cursor.next_page(rng.gen_range(0..=last_page_id))?;
    }
    Ok(step)
}
