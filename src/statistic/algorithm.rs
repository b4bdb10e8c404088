/// Grouping of Welford Online algorithms for calculating running values from one pass through.
/// See link:
/// https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance#Welford's_online_algorithm
pub struct WelfordOnline {}

impl WelfordOnline {
    /// Calculates the next running mean given the previous mean, the new value, and the new count.
    pub fn calculate_mean(prev_mean: f64, new_value: f64, new_count: f64) -> f64 {
        prev_mean + ((new_value - prev_mean) / new_count)
    }

    /// Calculates the Welford Online recurrence relation M
    pub fn calculate_recurrence_relation_m(prev_m: f64, prev_mean: f64, new_value: f64, new_mean: f64) -> f64 {
        prev_m + ((new_value - prev_mean) * (new_value - new_mean))
    }

    /// Calculates the unbiased 'Sample' Variance using Bessel's correction (count - 1), and the
    /// Welford Online recurrence relation M.
    pub fn calculate_sample_variance(recurrence_relation_m: f64, count: f64) -> f64 {
        match count < 2.0 {
            true => {
                0.0
            }
            false => {
                recurrence_relation_m / (count - 1.0)
            }
        }
    }

    /// Calculates the biased 'Population' Variance using the Welford Online recurrence relation M.
    pub fn calculate_population_variance(recurrence_relation_m: f64, count: f64) -> f64 {
        match count < 1.0 {
            true => {
                0.0
            }
            false => {
                recurrence_relation_m / count
            }
        }
    }
}
