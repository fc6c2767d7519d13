use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Container kinds ──────────────────────────────────────────────

/// What the field controller's presence sensors (or the vision peer) say
/// is sitting in the receiver. The wire protocol calls cans "bank".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    #[serde(rename = "bottle")]
    Bottle,
    #[serde(rename = "bank")]
    Can,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bottle => "bottle",
            Self::Can => "bank",
        }
    }

    /// Classification request sent to the vision peer for this hint.
    pub fn vision_request(self) -> &'static str {
        match self {
            Self::Bottle => "bottle_exist",
            Self::Can => "bank_exist",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire name of an optional detection memo (`"none"` when no type is known).
pub fn kind_or_none(kind: Option<ContainerKind>) -> &'static str {
    kind.map_or("none", ContainerKind::as_str)
}

// ─── Materials (sort direction) ───────────────────────────────────

/// Sort target. Plastic goes left, aluminium goes right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    Plastic,
    Aluminium,
}

impl Material {
    pub const ALL: [Self; 2] = [Self::Plastic, Self::Aluminium];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plastic => "plastic",
            Self::Aluminium => "aluminium",
        }
    }

    /// Label reported in `container_accepted.type`.
    pub fn accepted_label(self) -> &'static str {
        match self {
            Self::Plastic => "PET",
            Self::Aluminium => "CAN",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMaterial(pub String);

impl fmt::Display for UnknownMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown container type: {}", self.0)
    }
}

impl std::error::Error for UnknownMaterial {}

impl FromStr for Material {
    type Err = UnknownMaterial;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plastic" => Ok(Self::Plastic),
            "aluminium" | "aluminum" => Ok(Self::Aluminium),
            _ => Err(UnknownMaterial(s.to_owned())),
        }
    }
}

// ─── Machine state ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    #[default]
    Idle,
    WaitingVision,
    DumpingPlastic,
    DumpingAluminum,
    Error,
}

impl MachineState {
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::WaitingVision,
        Self::DumpingPlastic,
        Self::DumpingAluminum,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::WaitingVision => "WAITING_VISION",
            Self::DumpingPlastic => "DUMPING_PLASTIC",
            Self::DumpingAluminum => "DUMPING_ALUMINUM",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Vision verdict ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionVerdict {
    Recognized(ContainerKind),
    /// The vision peer answered `"none"`.
    Unrecognized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_parses_both_spellings() {
        assert_eq!("plastic".parse::<Material>(), Ok(Material::Plastic));
        assert_eq!("aluminium".parse::<Material>(), Ok(Material::Aluminium));
        assert_eq!(" Aluminum ".parse::<Material>(), Ok(Material::Aluminium));
        assert!("glass".parse::<Material>().is_err());
    }

    #[test]
    fn can_uses_bank_on_the_wire() {
        assert_eq!(ContainerKind::Can.as_str(), "bank");
        assert_eq!(ContainerKind::Can.vision_request(), "bank_exist");
        assert_eq!(
            serde_json::to_string(&ContainerKind::Can).expect("serialize"),
            "\"bank\""
        );
        assert_eq!(kind_or_none(None), "none");
    }

    #[test]
    fn machine_state_serializes_screaming() {
        for state in MachineState::ALL {
            let json = serde_json::to_string(&state).expect("serialize");
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }
}
