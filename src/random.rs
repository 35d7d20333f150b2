//! Deterministic random number series for the imprecision renderers.
//!
//! A [`RandomSeries`] memoizes every value it generates, indexed from 0.
//! Correlated distributions (Brownian noise, compensating triangle) need
//! that memory to derive each value from its predecessor; it also makes
//! fractional-index queries repeatable, which the imprecision renderer
//! relies on when it hands a series over from one map segment to the next.

use log::warn;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Bail out of a rejection-sampling loop after this many draws and clamp
/// instead. Only reachable with degenerate limit configurations.
const MAX_REJECTED_DRAWS: u32 = 10_000;

/// The distribution a [`RandomSeries`] draws from.
///
/// `lower`/`upper` are hard generation limits; `low_cut`/`high_cut` clip
/// the generated value afterwards where the distribution supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    Uniform {
        lower: f64,
        upper: f64,
    },
    Gaussian {
        standard_deviation: f64,
        lower: f64,
        upper: f64,
    },
    Triangular {
        lower: f64,
        upper: f64,
        mode: f64,
        low_cut: f64,
        high_cut: f64,
    },
    BrownianNoise {
        max_step_width: f64,
        lower: f64,
        upper: f64,
    },
    CompensatingTriangle {
        degree_of_correlation: f64,
        lower: f64,
        upper: f64,
        low_cut: f64,
        high_cut: f64,
    },
    /// A fixed list of values, repeated cyclically.
    List(Vec<f64>),
}

impl Distribution {
    /// Whether each value depends on its predecessor.
    pub fn is_correlated(&self) -> bool {
        matches!(
            self,
            Distribution::BrownianNoise { .. } | Distribution::CompensatingTriangle { .. }
        )
    }

    /// The hard generation limits, where the distribution has any.
    pub fn limits(&self) -> Option<(f64, f64)> {
        match *self {
            Distribution::Uniform { lower, upper }
            | Distribution::Gaussian { lower, upper, .. }
            | Distribution::Triangular { lower, upper, .. }
            | Distribution::BrownianNoise { lower, upper, .. }
            | Distribution::CompensatingTriangle { lower, upper, .. } => Some((lower, upper)),
            Distribution::List(_) => None,
        }
    }

    /// The span of values this distribution can produce, used as the
    /// default timing basis in milliseconds.
    pub fn span(&self) -> Option<f64> {
        match self {
            Distribution::Uniform { lower, upper }
            | Distribution::Gaussian { lower, upper, .. }
            | Distribution::BrownianNoise { lower, upper, .. } => Some(upper - lower),
            Distribution::Triangular {
                low_cut, high_cut, ..
            }
            | Distribution::CompensatingTriangle {
                low_cut, high_cut, ..
            } => Some(high_cut - low_cut),
            Distribution::List(values) => {
                let first = values.first()?;
                let (min, max) = values
                    .iter()
                    .fold((*first, *first), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                Some(max - min)
            }
        }
    }
}

/// A memoized series of random values drawn from one [`Distribution`].
#[derive(Debug, Clone)]
pub struct RandomSeries {
    distribution: Distribution,
    rng: ChaCha8Rng,
    series: Vec<f64>,
}

impl RandomSeries {
    /// Create a series seeded from entropy.
    pub fn new(distribution: Distribution) -> Self {
        Self::with_rng(distribution, ChaCha8Rng::from_entropy())
    }

    /// Create a series with an explicit seed for reproducible output.
    pub fn seeded(distribution: Distribution, seed: u64) -> Self {
        Self::with_rng(distribution, ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn with_rng(distribution: Distribution, rng: ChaCha8Rng) -> Self {
        let mut this = Self {
            distribution,
            rng,
            series: Vec::new(),
        };
        this.init_series();
        this
    }

    fn init_series(&mut self) {
        match &self.distribution {
            Distribution::BrownianNoise { lower, upper, .. } => {
                let (lower, upper) = (*lower, *upper);
                let first = self.rng.gen::<f64>() * (upper - lower) + lower;
                self.series.push(first);
            }
            Distribution::CompensatingTriangle {
                low_cut, high_cut, ..
            } => {
                let (low_cut, high_cut) = (*low_cut, *high_cut);
                let first = self.rng.gen::<f64>() * (high_cut - low_cut) + low_cut;
                self.series.push(first);
            }
            Distribution::List(values) => {
                self.series = values.clone();
            }
            _ => {}
        }
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Reseed the generator and discard the series generated so far.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.series.clear();
        self.init_series();
    }

    /// Restart a correlated series from a specific first value (clamped to
    /// the distribution's range). Uncorrelated distributions ignore this.
    pub fn set_initial_value(&mut self, value: f64) {
        let value = match self.distribution {
            Distribution::BrownianNoise { lower, upper, .. } => value.clamp(lower, upper),
            Distribution::CompensatingTriangle {
                low_cut, high_cut, ..
            } => value.clamp(low_cut, high_cut),
            _ => return,
        };
        self.series.clear();
        self.series.push(value);
    }

    /// The value at an integer index, generating up to it if necessary.
    pub fn value(&mut self, index: usize) -> f64 {
        if let Distribution::List(_) = self.distribution {
            if self.series.is_empty() {
                warn!("empty distribution list, yielding 0.0");
                return 0.0;
            }
            return self.series[index % self.series.len()];
        }
        while self.series.len() <= index {
            self.next_value();
        }
        self.series[index]
    }

    /// The value at a fractional index, interpolating linearly between the
    /// two neighboring series values. Negative indices clamp to 0.
    pub fn value_at(&mut self, index: f64) -> f64 {
        if index <= 0.0 {
            return self.value(0);
        }
        let whole = index.floor() as usize;
        let rest = index - index.floor();
        let a = self.value(whole);
        if rest <= 0.0 {
            return a;
        }
        let b = self.value(whole + 1);
        a + (b - a) * rest
    }

    fn next_value(&mut self) -> f64 {
        let d = match self.distribution.clone() {
            Distribution::Uniform { lower, upper } => {
                self.rng.gen::<f64>() * (upper - lower) + lower
            }
            Distribution::Gaussian {
                standard_deviation,
                lower,
                upper,
            } => {
                let mut value = lower.min(upper);
                for attempt in 0..MAX_REJECTED_DRAWS {
                    let g: f64 = self.rng.sample(StandardNormal);
                    value = g * standard_deviation;
                    if value >= lower && value <= upper {
                        break;
                    }
                    if attempt == MAX_REJECTED_DRAWS - 1 {
                        warn!("gaussian limits rejected every draw, clamping");
                        value = value.clamp(lower, upper);
                    }
                }
                value
            }
            Distribution::Triangular {
                lower,
                upper,
                mode,
                low_cut,
                high_cut,
            } => triangular(&mut self.rng, lower, upper, mode).clamp(low_cut, high_cut),
            Distribution::BrownianNoise {
                max_step_width,
                lower,
                upper,
            } => {
                let prev = self.series[self.series.len() - 1];
                let mut value = prev;
                for attempt in 0..MAX_REJECTED_DRAWS {
                    value = prev + (self.rng.gen::<f64>() - 0.5) * 2.0 * max_step_width;
                    if value >= lower && value <= upper {
                        break;
                    }
                    if attempt == MAX_REJECTED_DRAWS - 1 {
                        warn!("brownian limits rejected every step, clamping");
                        value = value.clamp(lower, upper);
                    }
                }
                value
            }
            Distribution::CompensatingTriangle {
                degree_of_correlation,
                lower,
                upper,
                low_cut,
                high_cut,
            } => {
                let prev = self.series[self.series.len() - 1];
                let narrowed_lower = prev - (prev - lower) / degree_of_correlation;
                let narrowed_upper = prev + (upper - prev) / degree_of_correlation;
                // degrees below 1.0 widen the range, so clamp back to the
                // hard limits before clipping
                triangular(&mut self.rng, narrowed_lower, narrowed_upper, prev)
                    .clamp(lower, upper)
                    .clamp(low_cut, high_cut)
            }
            Distribution::List(_) => unreachable!("list values are never generated"),
        };
        self.series.push(d);
        d
    }
}

/// One triangular-distributed draw over `[lower, upper]` peaking at `mode`.
pub(crate) fn triangular(rng: &mut ChaCha8Rng, lower: f64, upper: f64, mode: f64) -> f64 {
    if upper == lower {
        return upper;
    }
    let scale = upper - lower;
    let ca = mode - lower;
    let f = ca / scale;
    let r: f64 = rng.gen();
    if r < f {
        lower + (r * scale * ca).sqrt()
    } else {
        upper - ((1.0 - r) * scale * (upper - mode)).sqrt()
    }
}
