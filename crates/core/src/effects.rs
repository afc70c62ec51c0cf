//! TL effect catalog and symbolic-to-wire mapping.
//!
//! Pure mapping layer, no I/O: effect names to wire codes, scope strings to
//! the tie-break (`tb`) field, and the text/JSON color formats consumed by
//! callers into ordered RGB tuples.

use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// Named LED effects built into the module firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum TlEffect {
    Twinkle = 0x01,
    Ripple = 0x02,
    Staggered = 0x03,
    Breathing = 0x04,
    Meteor = 0x05,
    Runway = 0x06,
    Vortex = 0x07,
    Neon = 0x08,
    Stack = 0x09,
    Taichi = 0x0A,
}

impl TlEffect {
    /// Full catalog, in wire-code order.
    pub const ALL: &'static [TlEffect] = &[
        TlEffect::Twinkle,
        TlEffect::Ripple,
        TlEffect::Staggered,
        TlEffect::Breathing,
        TlEffect::Meteor,
        TlEffect::Runway,
        TlEffect::Vortex,
        TlEffect::Neon,
        TlEffect::Stack,
        TlEffect::Taichi,
    ];

    /// Wire-level effect code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Canonical upper-case name, as the original firmware tooling spells it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Twinkle => "TWINKLE",
            Self::Ripple => "RIPPLE",
            Self::Staggered => "STAGGERED",
            Self::Breathing => "BREATHING",
            Self::Meteor => "METEOR",
            Self::Runway => "RUNWAY",
            Self::Vortex => "VORTEX",
            Self::Neon => "NEON",
            Self::Stack => "STACK",
            Self::Taichi => "TAICHI",
        }
    }

    /// Case-insensitive catalog lookup (user input `twinkle` → `TWINKLE`).
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        Self::ALL.iter().copied().find(|e| e.name() == upper)
    }

    /// Draw uniformly from `subset`, or from the full catalog when `subset`
    /// is empty.
    pub fn random<R: Rng>(rng: &mut R, subset: &[TlEffect]) -> TlEffect {
        let pool = if subset.is_empty() { Self::ALL } else { subset };
        // Pools are never empty, so choose cannot fail.
        *pool.choose(rng).unwrap_or(&TlEffect::Twinkle)
    }
}

impl std::fmt::Display for TlEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which LED ring of a module an effect applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scope {
    Front,
    Behind,
    Both,
}

impl Scope {
    /// Tie-break field for the effect frame. `Both` carries no tb value and
    /// is encoded as a sentinel by the frame builder.
    pub fn tb(&self) -> Option<u8> {
        match self {
            Self::Front => Some(0),
            Self::Behind => Some(1),
            Self::Both => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "front" => Some(Self::Front),
            "behind" => Some(Self::Behind),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// One RGB triple.
pub type Rgb = (u8, u8, u8);

/// One playback frame: an ordered RGB triple per addressable LED segment.
pub type LedFrame = Vec<Rgb>;

/// Parse a single `"R,G,B"` color.
pub fn parse_color(spec: &str) -> Result<Rgb> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != 3 {
        return Err(Error::Usage(format!(
            "invalid color '{spec}', expected R,G,B"
        )));
    }
    let mut rgb = [0u8; 3];
    for (i, part) in parts.iter().enumerate() {
        rgb[i] = part
            .trim()
            .parse::<u8>()
            .map_err(|_| Error::Usage(format!("invalid color component '{part}' in '{spec}'")))?;
    }
    Ok((rgb[0], rgb[1], rgb[2]))
}

/// Parse a `"R,G,B;R,G,B;…"` color list into ordered triples.
pub fn parse_color_list(spec: &str) -> Result<Vec<Rgb>> {
    let colors: Vec<Rgb> = spec
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .map(parse_color)
        .collect::<Result<_>>()?;
    if colors.is_empty() {
        return Err(Error::Usage("empty color list".into()));
    }
    Ok(colors)
}

/// Parse the frame-file format: a JSON array of frames, each an array of
/// `[R, G, B]` integer triples.
pub fn parse_frames_json(text: &str) -> Result<Vec<LedFrame>> {
    let frames: Vec<Vec<[u8; 3]>> = serde_json::from_str(text)
        .map_err(|e| Error::Usage(format!("invalid frames file: {e}")))?;
    if frames.is_empty() {
        return Err(Error::Usage("frames file contains no frames".into()));
    }
    if frames.iter().any(|f| f.is_empty()) {
        return Err(Error::Usage("frames file contains an empty frame".into()));
    }
    Ok(frames
        .into_iter()
        .map(|frame| frame.into_iter().map(|[r, g, b]| (r, g, b)).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn effect_from_name_is_case_insensitive() {
        assert_eq!(TlEffect::from_name("twinkle"), Some(TlEffect::Twinkle));
        assert_eq!(TlEffect::from_name("TWINKLE"), Some(TlEffect::Twinkle));
        assert_eq!(TlEffect::from_name("RiPpLe"), Some(TlEffect::Ripple));
        assert_eq!(TlEffect::from_name("staggered"), Some(TlEffect::Staggered));
    }

    #[test]
    fn effect_from_name_rejects_unknown() {
        assert_eq!(TlEffect::from_name("disco"), None);
        assert_eq!(TlEffect::from_name(""), None);
    }

    #[test]
    fn effect_name_roundtrip() {
        for effect in TlEffect::ALL {
            assert_eq!(TlEffect::from_name(effect.name()), Some(*effect));
        }
    }

    #[test]
    fn effect_codes_are_distinct() {
        let mut codes: Vec<u8> = TlEffect::ALL.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), TlEffect::ALL.len());
    }

    #[test]
    fn random_effect_comes_from_catalog() {
        let mut rng = StepRng::new(7, 13);
        for _ in 0..32 {
            let effect = TlEffect::random(&mut rng, &[]);
            assert!(TlEffect::ALL.contains(&effect));
        }
    }

    #[test]
    fn random_effect_honors_subset() {
        let subset = [TlEffect::Neon];
        let mut rng = StepRng::new(0, 1);
        for _ in 0..8 {
            assert_eq!(TlEffect::random(&mut rng, &subset), TlEffect::Neon);
        }
    }

    #[test]
    fn scope_mapping_is_total_and_stable() {
        assert_eq!(Scope::Front.tb(), Some(0));
        assert_eq!(Scope::Behind.tb(), Some(1));
        assert_eq!(Scope::Both.tb(), None);
    }

    #[test]
    fn scope_from_name() {
        assert_eq!(Scope::from_name("front"), Some(Scope::Front));
        assert_eq!(Scope::from_name("BEHIND"), Some(Scope::Behind));
        assert_eq!(Scope::from_name("both"), Some(Scope::Both));
        assert_eq!(Scope::from_name("sideways"), None);
    }

    #[test]
    fn parse_color_accepts_triple() {
        assert_eq!(parse_color("255,128,0").unwrap(), (255, 128, 0));
        assert_eq!(parse_color(" 1 , 2 , 3 ").unwrap(), (1, 2, 3));
    }

    #[test]
    fn parse_color_rejects_malformed() {
        assert!(parse_color("255,128").is_err());
        assert!(parse_color("256,0,0").is_err());
        assert!(parse_color("a,b,c").is_err());
        assert!(parse_color("").is_err());
    }

    #[test]
    fn parse_color_list_ordered() {
        let list = parse_color_list("255,0,0;0,0,255").unwrap();
        assert_eq!(list, vec![(255, 0, 0), (0, 0, 255)]);
    }

    #[test]
    fn parse_color_list_rejects_empty() {
        assert!(parse_color_list("").is_err());
        assert!(parse_color_list(";;").is_err());
    }

    #[test]
    fn parse_frames_json_two_frames() {
        let text = r#"[[[255,0,0],[0,255,0]],[[0,0,255],[255,255,0]]]"#;
        let frames = parse_frames_json(text).unwrap();
        assert_eq!(
            frames,
            vec![
                vec![(255, 0, 0), (0, 255, 0)],
                vec![(0, 0, 255), (255, 255, 0)],
            ]
        );
    }

    #[test]
    fn parse_frames_json_rejects_bad_input() {
        assert!(parse_frames_json("not json").is_err());
        assert!(parse_frames_json("[]").is_err());
        assert!(parse_frames_json("[[]]").is_err());
        assert!(parse_frames_json("[[[300,0,0]]]").is_err());
    }
}
