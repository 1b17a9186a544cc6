//! Tektronix oscilloscope model definitions.
//!
//! Every model listed here is driven by [`Dpo7000`](crate::Dpo7000); the
//! DPO7000 family shares one command set.
//!
//! | Model    | Channels | Bandwidth |
//! |----------|----------|-----------|
//! | DPO7000  | 4        | (family)  |
//! | DPO7054  | 4        | 500 MHz   |
//! | DPO7104  | 4        | 1 GHz     |
//! | DPO7254  | 4        | 2.5 GHz   |
//! | DPO7354  | 4        | 3.5 GHz   |

/// Static model definition for a Tektronix oscilloscope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TektronixModel {
    /// Model name as it appears in bench configurations.
    pub name: &'static str,
    /// Number of analog input channels.
    pub channels: u8,
    /// Analog bandwidth in MHz; `0` for the family entry.
    pub bandwidth_mhz: u32,
}

/// The DPO7000 family entry used by bench configurations.
pub fn dpo7000() -> TektronixModel {
    TektronixModel {
        name: "DPO7000",
        channels: 4,
        bandwidth_mhz: 0,
    }
}

pub fn dpo7054() -> TektronixModel {
    TektronixModel {
        name: "DPO7054",
        channels: 4,
        bandwidth_mhz: 500,
    }
}

pub fn dpo7104() -> TektronixModel {
    TektronixModel {
        name: "DPO7104",
        channels: 4,
        bandwidth_mhz: 1000,
    }
}

pub fn dpo7254() -> TektronixModel {
    TektronixModel {
        name: "DPO7254",
        channels: 4,
        bandwidth_mhz: 2500,
    }
}

pub fn dpo7354() -> TektronixModel {
    TektronixModel {
        name: "DPO7354",
        channels: 4,
        bandwidth_mhz: 3500,
    }
}

/// Every supported model.
pub fn all_models() -> Vec<TektronixModel> {
    vec![dpo7000(), dpo7054(), dpo7104(), dpo7254(), dpo7354()]
}

/// Find a model by name, ignoring case and surrounding whitespace.
pub fn lookup(name: &str) -> Option<TektronixModel> {
    let name = name.trim();
    all_models()
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Guess the oscilloscope vendor from a model-name prefix.
pub fn vendor_for_model(name: &str) -> &'static str {
    let name = name.trim().to_ascii_uppercase();
    let has = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));
    if has(&["DPO", "MSO", "TDS"]) {
        "Tektronix"
    } else if has(&["DSO", "MSA"]) {
        "Keysight"
    } else if has(&["RTM", "RTO"]) {
        "Rohde & Schwarz"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(lookup("dpo7000"), Some(dpo7000()));
        assert_eq!(lookup(" DPO7254 "), Some(dpo7254()));
        assert_eq!(lookup("MSO4000"), None);
    }

    #[test]
    fn model_names_are_unique() {
        let models = all_models();
        for (i, a) in models.iter().enumerate() {
            for b in &models[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn vendor_by_prefix() {
        assert_eq!(vendor_for_model("DPO7000"), "Tektronix");
        assert_eq!(vendor_for_model("mso4104"), "Tektronix");
        assert_eq!(vendor_for_model("TDS2024"), "Tektronix");
        assert_eq!(vendor_for_model("DSOX3024"), "Keysight");
        assert_eq!(vendor_for_model("RTO2044"), "Rohde & Schwarz");
        assert_eq!(vendor_for_model("SDS1104"), "Unknown");
    }
}
