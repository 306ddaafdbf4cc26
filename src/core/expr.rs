//! Deferred per-pixel mask expressions
//!
//! Masks are described as small expression trees and only turned into
//! pixels when an evaluator asks for them. Trees compose with `&`, `|`
//! and `!`.

use crate::types::{CountError, CountResult, MaskImage, Scene};
use ndarray::{Array2, Zip};
use std::ops::{BitAnd, BitOr, Not};

/// Boolean raster expression over the bands of one scene
#[derive(Debug, Clone, PartialEq)]
pub enum MaskExpr {
    Constant(bool),
    /// Bit `n` of the quality word is set
    QaBit(u8),
    /// Reflectance band strictly below a digital-number threshold
    BandBelow { band: String, threshold: i32 },
    /// Pixel present in every band of the scene, quality band included
    AllBandsValid,
    Not(Box<MaskExpr>),
    And(Vec<MaskExpr>),
    Or(Vec<MaskExpr>),
}

impl MaskExpr {
    pub fn qa_bit(bit: u8) -> Self {
        MaskExpr::QaBit(bit)
    }

    pub fn band_below(band: impl Into<String>, threshold: i32) -> Self {
        MaskExpr::BandBelow {
            band: band.into(),
            threshold,
        }
    }

    /// Materialize the expression on the scene's own grid
    pub fn evaluate(&self, scene: &Scene) -> CountResult<MaskImage> {
        let dim = scene.dim();

        match self {
            MaskExpr::Constant(value) => Ok(Array2::from_elem(dim, *value)),
            MaskExpr::QaBit(bit) => {
                if *bit >= 16 {
                    return Err(CountError::Processing(format!(
                        "Quality bit {} is outside the 16-bit flag word",
                        bit
                    )));
                }
                let flag = 1u16 << bit;
                Ok(scene.qa.data.mapv(|qa| qa & flag != 0))
            }
            MaskExpr::BandBelow { band, threshold } => {
                let band = scene.band(band)?;
                Ok(band.data.mapv(|v| i32::from(v) < *threshold))
            }
            MaskExpr::AllBandsValid => {
                let mut present = scene.qa.valid.clone();
                for band in scene.reflectance.values() {
                    Zip::from(&mut present)
                        .and(&band.valid)
                        .for_each(|p, &v| *p = *p && v);
                }
                Ok(present)
            }
            MaskExpr::Not(inner) => Ok(inner.evaluate(scene)?.mapv(|v| !v)),
            MaskExpr::And(terms) => {
                let mut acc = Array2::from_elem(dim, true);
                for term in terms {
                    let mask = term.evaluate(scene)?;
                    Zip::from(&mut acc).and(&mask).for_each(|a, &m| *a = *a && m);
                }
                Ok(acc)
            }
            MaskExpr::Or(terms) => {
                let mut acc = Array2::from_elem(dim, false);
                for term in terms {
                    let mask = term.evaluate(scene)?;
                    Zip::from(&mut acc).and(&mask).for_each(|a, &m| *a = *a || m);
                }
                Ok(acc)
            }
        }
    }
}

impl BitAnd for MaskExpr {
    type Output = MaskExpr;

    fn bitand(self, rhs: MaskExpr) -> MaskExpr {
        match (self, rhs) {
            (MaskExpr::And(mut left), MaskExpr::And(right)) => {
                left.extend(right);
                MaskExpr::And(left)
            }
            (MaskExpr::And(mut left), rhs) => {
                left.push(rhs);
                MaskExpr::And(left)
            }
            (lhs, rhs) => MaskExpr::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for MaskExpr {
    type Output = MaskExpr;

    fn bitor(self, rhs: MaskExpr) -> MaskExpr {
        match (self, rhs) {
            (MaskExpr::Or(mut left), MaskExpr::Or(right)) => {
                left.extend(right);
                MaskExpr::Or(left)
            }
            (MaskExpr::Or(mut left), rhs) => {
                left.push(rhs);
                MaskExpr::Or(left)
            }
            (lhs, rhs) => MaskExpr::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for MaskExpr {
    type Output = MaskExpr;

    fn not(self) -> MaskExpr {
        match self {
            MaskExpr::Not(inner) => *inner,
            MaskExpr::Constant(v) => MaskExpr::Constant(!v),
            other => MaskExpr::Not(Box::new(other)),
        }
    }
}

fn write_joined(f: &mut std::fmt::Formatter<'_>, terms: &[MaskExpr], op: &str) -> std::fmt::Result {
    write!(f, "(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", op)?;
        }
        write!(f, "{}", term)?;
    }
    write!(f, ")")
}

impl std::fmt::Display for MaskExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskExpr::Constant(v) => write!(f, "{}", v),
            MaskExpr::QaBit(bit) => write!(f, "qa[{}]", bit),
            MaskExpr::BandBelow { band, threshold } => write!(f, "{} < {}", band, threshold),
            MaskExpr::AllBandsValid => write!(f, "all_bands_valid"),
            MaskExpr::Not(inner) => write!(f, "!{}", inner),
            MaskExpr::And(terms) => write_joined(f, terms, "&"),
            MaskExpr::Or(terms) => write_joined(f, terms, "|"),
        }
    }
}
