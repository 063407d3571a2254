//! Temperature annealing of sampling distributions.

/// How an unnormalized conditional is reshaped before sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Annealer {
    /// Raise the normalized distribution to `1/temperature`
    Simulated {
        /// Current temperature; 1 means plain Gibbs sampling
        temperature: f64,
    },
    /// Put all mass on the most probable entry
    MaximumPosterior,
}

impl Annealer {
    /// Annealer at the given temperature
    pub fn simulated(temperature: f64) -> Self {
        Annealer::Simulated { temperature }
    }

    /// Reshape `probs` in place and return the sum to scale the uniform
    /// draw by.
    ///
    /// At temperature 1 the vector is left untouched and its plain sum is
    /// returned.
    pub fn anneal(&self, probs: &mut [f64]) -> f64 {
        match *self {
            Annealer::Simulated { temperature } => {
                let sum: f64 = probs.iter().sum();
                if temperature == 1.0 {
                    return sum;
                }
                let power = 1.0 / temperature;
                let mut total = 0.0;
                for p in probs.iter_mut() {
                    *p = (*p / sum).powf(power);
                    total += *p;
                }
                for p in probs.iter_mut() {
                    *p /= total;
                }
                probs.iter().sum()
            }
            Annealer::MaximumPosterior => {
                let mut best = 0;
                for (j, &p) in probs.iter().enumerate() {
                    if p > probs[best] {
                        best = j;
                    }
                }
                for (j, p) in probs.iter_mut().enumerate() {
                    *p = if j == best { 1.0 } else { 0.0 };
                }
                1.0
            }
        }
    }

    /// Temperature, if any
    pub fn temperature(&self) -> Option<f64> {
        match *self {
            Annealer::Simulated { temperature } => Some(temperature),
            Annealer::MaximumPosterior => None,
        }
    }
}

/// Linear cooling from `initial` down to `target` by `decrement` per outer
/// iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSchedule {
    /// Temperature of the first outer iteration
    pub initial: f64,
    /// Step between outer iterations
    pub decrement: f64,
    /// Temperature of the last outer iteration
    pub target: f64,
}

impl TemperatureSchedule {
    /// Schedule that cools from `initial` to `target`
    pub fn new(initial: f64, decrement: f64, target: f64) -> Self {
        TemperatureSchedule {
            initial,
            decrement,
            target,
        }
    }

    /// `round((initial - target) / decrement) + 1`, or 1 when there is
    /// nothing to cool
    pub fn outer_iterations(&self) -> usize {
        if self.decrement <= 0.0 || self.initial <= self.target {
            return 1;
        }
        ((self.initial - self.target) / self.decrement).round() as usize + 1
    }

    /// Temperature of the `outer`-th outer iteration, clamped at `target`
    pub fn temperature_at(&self, outer: usize) -> f64 {
        let t = self.initial - self.decrement * outer as f64;
        if t < self.target || outer + 1 >= self.outer_iterations() {
            self.target
        } else {
            t
        }
    }

    /// All temperatures in order
    pub fn temperatures(&self) -> Vec<f64> {
        (0..self.outer_iterations())
            .map(|o| self.temperature_at(o))
            .collect()
    }
}
