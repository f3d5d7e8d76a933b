// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility and antenna polarisations.
//!
//! Visibility polarisations are the linear-feed products `xx`, `yy`, `xy` and
//! `yx`; they carry the AIPS numbering used in calibration files (-5 to -8).
//! Each is formed from two antenna polarisations (`x` or `y`).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolError {
    #[error("'{0}' is not a recognised polarisation; expected one of xx, yy, xy, yx")]
    Unrecognised(String),

    #[error("{0} is not an AIPS linear-feed polarisation number (expected -5 to -8)")]
    BadAipsNumber(i32),
}

/// A visibility polarisation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Pol {
    #[strum(serialize = "xx")]
    XX,
    #[strum(serialize = "yy")]
    YY,
    #[strum(serialize = "xy")]
    XY,
    #[strum(serialize = "yx")]
    YX,
}

/// An antenna (feed) polarisation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum AntPol {
    #[strum(serialize = "x")]
    X,
    #[strum(serialize = "y")]
    Y,
}

impl Pol {
    /// Parse a polarisation string, ignoring case. This is friendlier than
    /// [`Pol::from_str`] because the error says what was expected.
    pub fn parse(s: &str) -> Result<Pol, PolError> {
        Pol::from_str(s.trim()).map_err(|_| PolError::Unrecognised(s.to_string()))
    }

    /// The AIPS polarisation number.
    pub fn to_aips(self) -> i32 {
        match self {
            Pol::XX => -5,
            Pol::YY => -6,
            Pol::XY => -7,
            Pol::YX => -8,
        }
    }

    pub fn from_aips(num: i32) -> Result<Pol, PolError> {
        match num {
            -5 => Ok(Pol::XX),
            -6 => Ok(Pol::YY),
            -7 => Ok(Pol::XY),
            -8 => Ok(Pol::YX),
            _ => Err(PolError::BadAipsNumber(num)),
        }
    }

    /// Split this visibility polarisation into the polarisations of the two
    /// antennas that formed it.
    pub fn split(self) -> (AntPol, AntPol) {
        match self {
            Pol::XX => (AntPol::X, AntPol::X),
            Pol::YY => (AntPol::Y, AntPol::Y),
            Pol::XY => (AntPol::X, AntPol::Y),
            Pol::YX => (AntPol::Y, AntPol::X),
        }
    }

    /// Given V_ij with this polarisation, the polarisation of V_ji such that
    /// conj(V_ji) = V_ij. Cross pols swap; the others are unaffected.
    pub fn conj(self) -> Pol {
        match self {
            Pol::XY => Pol::YX,
            Pol::YX => Pol::XY,
            p => p,
        }
    }

    pub fn is_cross(self) -> bool {
        matches!(self, Pol::XY | Pol::YX)
    }

    /// The visibility polarisation formed by two antenna polarisations.
    pub fn from_antpols(a1: AntPol, a2: AntPol) -> Pol {
        match (a1, a2) {
            (AntPol::X, AntPol::X) => Pol::XX,
            (AntPol::Y, AntPol::Y) => Pol::YY,
            (AntPol::X, AntPol::Y) => Pol::XY,
            (AntPol::Y, AntPol::X) => Pol::YX,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Pol::parse("xx"), Ok(Pol::XX));
        assert_eq!(Pol::parse("XX"), Ok(Pol::XX));
        assert_eq!(Pol::parse("yY"), Ok(Pol::YY));
        assert_eq!(Pol::parse(" yx "), Ok(Pol::YX));
        assert!(matches!(Pol::parse("zz"), Err(PolError::Unrecognised(_))));
        assert!(Pol::parse("").is_err());
    }

    #[test]
    fn test_display_is_lowercase() {
        assert_eq!(Pol::XX.to_string(), "xx");
        assert_eq!(Pol::YX.to_string(), "yx");
        assert_eq!(AntPol::Y.to_string(), "y");
    }

    #[test]
    fn test_aips_numbers_round_trip() {
        for pol in Pol::iter() {
            assert_eq!(Pol::from_aips(pol.to_aips()), Ok(pol));
        }
        assert_eq!(Pol::XX.to_aips(), -5);
        assert_eq!(Pol::from_aips(1), Err(PolError::BadAipsNumber(1)));
    }

    #[test]
    fn test_split_and_conj() {
        assert_eq!(Pol::XY.split(), (AntPol::X, AntPol::Y));
        assert_eq!(Pol::XY.conj(), Pol::YX);
        assert_eq!(Pol::XX.conj(), Pol::XX);
        for pol in Pol::iter() {
            let (a1, a2) = pol.split();
            assert_eq!(Pol::from_antpols(a1, a2), pol);
            // Conjugating swaps the antenna polarisations.
            assert_eq!(pol.conj().split(), (a2, a1));
        }
    }
}
