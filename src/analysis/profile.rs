use serde::{Deserialize, Serialize};

/// Known headsets and their electrode layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    /// Muse headband: TP9, AF7, AF8, TP10
    #[default]
    Muse,
    /// Neurosity Crown: 8 channels
    Crown,
    /// Unknown device with `n` numbered channels
    Generic(usize),
}

impl DeviceProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "muse" => Some(Self::Muse),
            "crown" => Some(Self::Crown),
            other => other
                .strip_prefix("generic")
                .and_then(|n| n.trim_start_matches(['-', ':']).parse().ok())
                .filter(|&n: &usize| n > 0)
                .map(Self::Generic),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Muse => "muse".to_string(),
            Self::Crown => "crown".to_string(),
            Self::Generic(n) => format!("generic-{}", n),
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        match self {
            Self::Muse => ["TP9", "AF7", "AF8", "TP10"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Self::Crown => ["CP3", "C3", "F5", "PO3", "PO4", "F6", "C4", "CP4"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            Self::Generic(n) => (0..*n).map(|i| format!("channel{}", i)).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            Self::Muse => 4,
            Self::Crown => 8,
            Self::Generic(n) => *n,
        }
    }

    /// Column indices of the frontal electrode pair used for coherence
    pub fn frontal_pair(&self) -> (usize, usize) {
        match self {
            // AF7, AF8
            Self::Muse => (1, 2),
            // F5, F6
            Self::Crown => (2, 5),
            Self::Generic(n) if *n >= 2 => (0, 1),
            Self::Generic(_) => (0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(DeviceProfile::from_name("Muse"), Some(DeviceProfile::Muse));
        assert_eq!(DeviceProfile::from_name("crown"), Some(DeviceProfile::Crown));
        assert_eq!(
            DeviceProfile::from_name("generic-3"),
            Some(DeviceProfile::Generic(3))
        );
        assert_eq!(DeviceProfile::from_name("generic-0"), None);
        assert_eq!(DeviceProfile::from_name("openbci"), None);
    }

    #[test]
    fn test_frontal_pair_within_channels() {
        for profile in [DeviceProfile::Muse, DeviceProfile::Crown, DeviceProfile::Generic(2)] {
            let (a, b) = profile.frontal_pair();
            assert!(a < profile.channel_count());
            assert!(b < profile.channel_count());
        }
        assert_eq!(DeviceProfile::Muse.channel_names()[1], "AF7");
    }
}
