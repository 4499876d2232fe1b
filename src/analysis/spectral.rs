// Band power and frontal coherence over one analysis window
//
// Spectra are one-sided periodograms of the linearly detrended, Hann-windowed
// signal. Coherence uses Welch averaging with one-second segments and 50%
// overlap, so coherence bins are 1 Hz apart.

use super::{Analyzer, DeviceProfile};
use crate::streaming::types::{StreamError, StreamResult};
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// EEG frequency bands in Hz, lower bound inclusive, upper bound exclusive
pub const EEG_BANDS: [(&str, f64, f64); 5] = [
    ("Delta", 1.0, 4.0),
    ("Theta", 4.0, 8.0),
    ("Alpha", 8.0, 12.0),
    ("Beta", 12.0, 24.0),
    ("Gamma", 24.0, 48.0),
];

/// Divisors applied to band power before computing relative power
const OCTAVE_WIDTHS: [f64; 5] = [4.0, 1.0, 0.5, 1.0, 1.0];

/// Peak coherence frequency is searched below this bin
const COHERENCE_PEAK_LIMIT_HZ: usize = 40;

#[derive(Debug, Clone, Default)]
pub struct BandPowerAnalyzer;

impl BandPowerAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for BandPowerAnalyzer {
    fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = EEG_BANDS
            .iter()
            .map(|(band, _, _)| format!("{} Power", band))
            .collect();
        names.extend(EEG_BANDS.iter().map(|(band, _, _)| format!("{} Coherence", band)));
        names.extend(
            [
                "Ratio Delta-Beta",
                "Ratio Alpha-Gamma",
                "Frontal Coherence",
                "Coherence Frequency",
                "Power Band",
                "Coherence Band",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        names
    }

    fn analyze(
        &self,
        window: &[Vec<f64>],
        sample_rate: f64,
        profile: &DeviceProfile,
    ) -> StreamResult<Vec<(String, f64)>> {
        let channel_count = profile.channel_count();
        let segment_len = sample_rate.round() as usize;
        if window.len() < segment_len.max(2) {
            return Err(StreamError::Analysis(format!(
                "window of {} rows is shorter than one second at {} Hz",
                window.len(),
                sample_rate
            )));
        }

        let channels = columns(window, channel_count)?;
        let detrended: Vec<Vec<f64>> = channels.iter().map(|c| detrend(c)).collect();

        let relative_power = relative_band_power(&detrended, sample_rate)?;

        let (a, b) = profile.frontal_pair();
        let coherence = welch_coherence(&detrended[a], &detrended[b], segment_len);
        let band_coherence = band_coherence(&coherence, sample_rate, segment_len);

        let ratio = |num: f64, den: f64, label: &str| {
            if den > 0.0 {
                Ok(num / den)
            } else {
                Err(StreamError::Analysis(format!("{} power is zero", label)))
            }
        };
        let delta_beta = ratio(relative_power[0], relative_power[3], "Beta")?;
        let alpha_gamma = ratio(relative_power[2], relative_power[4], "Gamma")?;

        let frontal = if coherence.is_empty() {
            0.0
        } else {
            coherence.iter().sum::<f64>() / coherence.len() as f64
        };
        let peak_limit = COHERENCE_PEAK_LIMIT_HZ.min(coherence.len());
        let coherence_peak = argmax(&coherence[..peak_limit]).unwrap_or(0);

        let mut metrics = Vec::with_capacity(16);
        for (i, (band, _, _)) in EEG_BANDS.iter().enumerate() {
            metrics.push((format!("{} Power", band), relative_power[i]));
        }
        for (i, (band, _, _)) in EEG_BANDS.iter().enumerate() {
            metrics.push((format!("{} Coherence", band), band_coherence[i]));
        }
        metrics.push(("Ratio Delta-Beta".to_string(), delta_beta));
        metrics.push(("Ratio Alpha-Gamma".to_string(), alpha_gamma));
        metrics.push(("Frontal Coherence".to_string(), frontal));
        metrics.push(("Coherence Frequency".to_string(), coherence_peak as f64));
        metrics.push((
            "Power Band".to_string(),
            argmax(&relative_power).unwrap_or(0) as f64,
        ));
        metrics.push((
            "Coherence Band".to_string(),
            argmax(&band_coherence).unwrap_or(0) as f64,
        ));

        Ok(metrics)
    }
}

/// Transpose rows into the first `count` channel columns
fn columns(window: &[Vec<f64>], count: usize) -> StreamResult<Vec<Vec<f64>>> {
    let mut out = vec![Vec::with_capacity(window.len()); count];
    for row in window {
        if row.len() < count {
            return Err(StreamError::SchemaMismatch(format!(
                "row has {} values, analysis needs {}",
                row.len(),
                count
            )));
        }
        for (column, &value) in out.iter_mut().zip(row) {
            column.push(value);
        }
    }
    Ok(out)
}

/// Remove the least-squares line from a signal
fn detrend(signal: &[f64]) -> Vec<f64> {
    let n = signal.len() as f64;
    if signal.len() < 2 {
        return signal.to_vec();
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = signal.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, &y) in signal.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }
    let slope = cov / var;
    signal
        .iter()
        .enumerate()
        .map(|(i, &y)| y - (mean_y + slope * (i as f64 - mean_x)))
        .collect()
}

fn hann(len: usize) -> Vec<f64> {
    if len < 2 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (len - 1) as f64).cos()))
        .collect()
}

fn windowed_spectrum(fft: &Arc<dyn Fft<f64>>, signal: &[f64], taper: &[f64]) -> Vec<Complex<f64>> {
    let mut buffer: Vec<Complex<f64>> = signal
        .iter()
        .zip(taper)
        .map(|(&x, &w)| Complex::new(x * w, 0.0))
        .collect();
    fft.process(&mut buffer);
    buffer.truncate(signal.len() / 2 + 1);
    buffer
}

/// Relative power per EEG band, averaged over channels and octave-normalized
fn relative_band_power(channels: &[Vec<f64>], sample_rate: f64) -> StreamResult<Vec<f64>> {
    let n = channels.first().map(Vec::len).unwrap_or(0);
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let taper = hann(n);
    let taper_power: f64 = taper.iter().map(|w| w * w).sum();
    let freq_res = sample_rate / n as f64;

    let per_channel: Vec<[f64; 5]> = channels
        .par_iter()
        .map(|signal| {
            let spectrum = windowed_spectrum(&fft, signal, &taper);
            let mut bands = [0.0; 5];
            for (k, c) in spectrum.iter().enumerate() {
                let freq = k as f64 * freq_res;
                let psd = 2.0 * c.norm_sqr() / (sample_rate * taper_power);
                for (slot, (_, low, high)) in bands.iter_mut().zip(EEG_BANDS.iter()) {
                    if freq >= *low && freq < *high {
                        *slot += psd * freq_res;
                    }
                }
            }
            bands
        })
        .collect();

    let count = per_channel.len().max(1) as f64;
    let mut total = [0.0; 5];
    for bands in &per_channel {
        for (t, b) in total.iter_mut().zip(bands) {
            *t += b / count;
        }
    }
    for (t, width) in total.iter_mut().zip(OCTAVE_WIDTHS) {
        *t /= width;
    }

    let sum: f64 = total.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(StreamError::Analysis(
            "window has no power in any EEG band".to_string(),
        ));
    }
    Ok(total.iter().map(|t| t / sum).collect())
}

/// Magnitude-squared coherence between two signals, one value per bin
fn welch_coherence(x: &[f64], y: &[f64], segment_len: usize) -> Vec<f64> {
    let step = (segment_len / 2).max(1);
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(segment_len);
    let taper = hann(segment_len);
    let bins = segment_len / 2 + 1;

    let mut pxx = vec![0.0; bins];
    let mut pyy = vec![0.0; bins];
    let mut pxy = vec![Complex::new(0.0, 0.0); bins];

    let mut start = 0;
    while start + segment_len <= x.len().min(y.len()) {
        let sx = windowed_spectrum(&fft, &x[start..start + segment_len], &taper);
        let sy = windowed_spectrum(&fft, &y[start..start + segment_len], &taper);
        for k in 0..bins {
            pxx[k] += sx[k].norm_sqr();
            pyy[k] += sy[k].norm_sqr();
            pxy[k] += sx[k].conj() * sy[k];
        }
        start += step;
    }

    (0..bins)
        .map(|k| {
            let denom = pxx[k] * pyy[k];
            if denom > 0.0 {
                pxy[k].norm_sqr() / denom
            } else {
                0.0
            }
        })
        .collect()
}

/// Min-max normalized coherence averaged over each band's bins
fn band_coherence(coherence: &[f64], sample_rate: f64, segment_len: usize) -> Vec<f64> {
    let min = coherence.iter().copied().fold(f64::INFINITY, f64::min);
    let max = coherence.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;
    let freq_res = sample_rate / segment_len as f64;

    EEG_BANDS
        .iter()
        .map(|(_, low, high)| {
            let values: Vec<f64> = coherence
                .iter()
                .enumerate()
                .filter(|(k, _)| {
                    let freq = *k as f64 * freq_res;
                    freq >= *low && freq < *high
                })
                .map(|(_, &c)| if spread > 0.0 { (c - min) / spread } else { 0.0 })
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect()
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_window(freq: f64, sample_rate: f64, seconds: usize, channels: usize) -> Vec<Vec<f64>> {
        let n = sample_rate as usize * seconds;
        (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                (0..channels)
                    .map(|c| (2.0 * PI * freq * t + c as f64 * 0.3).sin() * 50.0 + 0.01 * i as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_alpha_sine_dominates_alpha_band() {
        let analyzer = BandPowerAnalyzer::new();
        let window = sine_window(10.0, 256.0, 5, 4);
        let metrics = analyzer.analyze(&window, 256.0, &DeviceProfile::Muse).unwrap();

        let names: Vec<&str> = metrics.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, analyzer.metric_names());

        let get = |name: &str| metrics.iter().find(|(n, _)| n == name).unwrap().1;
        assert!(get("Alpha Power") > 0.9);
        assert_eq!(get("Power Band"), 2.0);

        let total: f64 = EEG_BANDS.iter().map(|(b, _, _)| get(&format!("{} Power", b))).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_window_rejected() {
        let analyzer = BandPowerAnalyzer::new();
        let window = sine_window(10.0, 256.0, 1, 4);
        let result = analyzer.analyze(&window[..100], 256.0, &DeviceProfile::Muse);
        assert!(matches!(result, Err(StreamError::Analysis(_))));
    }

    #[test]
    fn test_flat_window_rejected() {
        let analyzer = BandPowerAnalyzer::new();
        let window = vec![vec![5.0; 4]; 512];
        let result = analyzer.analyze(&window, 256.0, &DeviceProfile::Muse);
        assert!(matches!(result, Err(StreamError::Analysis(_))));
    }

    #[test]
    fn test_detrend_removes_line() {
        let line: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        assert!(detrend(&line).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[1.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
