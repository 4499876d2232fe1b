// Windowed analysis collaborators
//
// The periodic analysis transform hands each full analysis window to an
// `Analyzer`. `BandPowerAnalyzer` is the default spectral implementation.

mod profile;
mod spectral;

pub use profile::DeviceProfile;
pub use spectral::{BandPowerAnalyzer, EEG_BANDS};

use crate::streaming::types::StreamResult;

/// External analysis function applied to one window of packet rows
pub trait Analyzer: Send + Sync {
    /// Metric names returned by `analyze`, in emission order
    fn metric_names(&self) -> Vec<String>;

    /// Analyze `window` (rows oldest to newest, one packet per row) and return
    /// one value per metric.
    fn analyze(
        &self,
        window: &[Vec<f64>],
        sample_rate: f64,
        profile: &DeviceProfile,
    ) -> StreamResult<Vec<(String, f64)>>;
}

/// Normalize a metric name to snake_case: "Ratio Delta-Beta" -> "ratio_delta_beta"
pub fn normalize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_metric_name() {
        assert_eq!(normalize_metric_name("Delta Power"), "delta_power");
        assert_eq!(normalize_metric_name("Ratio Delta-Beta"), "ratio_delta_beta");
        assert_eq!(normalize_metric_name("frontalCoherence"), "frontal_coherence");
        assert_eq!(normalize_metric_name("already_snake"), "already_snake");
        assert_eq!(normalize_metric_name(" Power  Band "), "power_band");
    }
}
