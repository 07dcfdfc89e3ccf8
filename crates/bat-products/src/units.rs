//! Unit-tagged 1-D arrays.
//!
//! A [`Quantity`] pairs an `ndarray` vector with a [`Unit`]. Units convert
//! freely within a dimension (time, energy, area); anything else is carried
//! as an opaque tag and only converts to itself.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use ndarray::Array1;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Physical dimension a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Time,
    Energy,
    Area,
    Counts,
    Rate,
    Dimensionless,
    Other,
}

/// Units found in BAT products, plus a free-form escape hatch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    Second,
    Millisecond,
    Microsecond,
    Kilosecond,
    Day,
    ElectronVolt,
    KiloElectronVolt,
    MegaElectronVolt,
    GigaElectronVolt,
    SquareCentimeter,
    SquareMeter,
    Count,
    CountPerSecond,
    Dimensionless,
    /// Any other unit string, kept verbatim.
    Other(String),
}

impl Unit {
    /// Interpret a FITS `TUNITn`/`TIMEUNIT` string. Unknown strings become
    /// [`Unit::Other`].
    pub fn parse(text: &str) -> Unit {
        match text.trim() {
            "s" | "sec" | "second" | "seconds" => Unit::Second,
            "ms" => Unit::Millisecond,
            "us" => Unit::Microsecond,
            "ks" => Unit::Kilosecond,
            "d" | "day" | "days" => Unit::Day,
            "eV" => Unit::ElectronVolt,
            "keV" | "kev" | "KEV" => Unit::KiloElectronVolt,
            "MeV" => Unit::MegaElectronVolt,
            "GeV" => Unit::GigaElectronVolt,
            "cm2" | "cm**2" | "cm^2" => Unit::SquareCentimeter,
            "m2" | "m**2" | "m^2" => Unit::SquareMeter,
            "count" | "counts" | "ct" => Unit::Count,
            "count/s" | "counts/s" | "ct/s" => Unit::CountPerSecond,
            "" => Unit::Dimensionless,
            other => Unit::Other(other.to_string()),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Unit::Second => "s",
            Unit::Millisecond => "ms",
            Unit::Microsecond => "us",
            Unit::Kilosecond => "ks",
            Unit::Day => "d",
            Unit::ElectronVolt => "eV",
            Unit::KiloElectronVolt => "keV",
            Unit::MegaElectronVolt => "MeV",
            Unit::GigaElectronVolt => "GeV",
            Unit::SquareCentimeter => "cm2",
            Unit::SquareMeter => "m2",
            Unit::Count => "count",
            Unit::CountPerSecond => "count/s",
            Unit::Dimensionless => "",
            Unit::Other(s) => s,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Second | Unit::Millisecond | Unit::Microsecond | Unit::Kilosecond | Unit::Day => {
                Dimension::Time
            }
            Unit::ElectronVolt
            | Unit::KiloElectronVolt
            | Unit::MegaElectronVolt
            | Unit::GigaElectronVolt => Dimension::Energy,
            Unit::SquareCentimeter | Unit::SquareMeter => Dimension::Area,
            Unit::Count => Dimension::Counts,
            Unit::CountPerSecond => Dimension::Rate,
            Unit::Dimensionless => Dimension::Dimensionless,
            Unit::Other(_) => Dimension::Other,
        }
    }

    /// Factor to the dimension's base unit (s, keV, cm2).
    fn scale(&self) -> f64 {
        match self {
            Unit::Millisecond => 1e-3,
            Unit::Microsecond => 1e-6,
            Unit::Kilosecond => 1e3,
            Unit::Day => 86_400.0,
            Unit::ElectronVolt => 1e-3,
            Unit::MegaElectronVolt => 1e3,
            Unit::GigaElectronVolt => 1e6,
            Unit::SquareMeter => 1e4,
            _ => 1.0,
        }
    }

    /// Multiplier taking values in `self` to values in `target`.
    pub fn factor_to(&self, target: &Unit) -> Result<f64> {
        if self == target {
            return Ok(1.0);
        }
        let dim = self.dimension();
        if dim != target.dimension() || dim == Dimension::Other {
            return Err(Error::invalid(format!(
                "cannot convert '{}' to '{}'",
                self.symbol(),
                target.symbol()
            )));
        }
        Ok(self.scale() / target.scale())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A vector of values with a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    values: Array1<f64>,
    unit: Unit,
}

impl Quantity {
    pub fn new(values: Array1<f64>, unit: Unit) -> Self {
        Quantity { values, unit }
    }

    pub fn from_vec(values: Vec<f64>, unit: Unit) -> Self {
        Quantity::new(Array1::from(values), unit)
    }

    /// A one-element quantity.
    pub fn scalar(value: f64, unit: Unit) -> Self {
        Quantity::from_vec(vec![value], unit)
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.to_vec()
    }

    pub fn first(&self) -> Option<f64> {
        self.values.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Convert to `unit`; fails across dimensions.
    pub fn to(&self, unit: &Unit) -> Result<Quantity> {
        let factor = self.unit.factor_to(unit)?;
        Ok(Quantity::new(&self.values * factor, unit.clone()))
    }

    /// Raw values expressed in `unit`.
    pub fn values_in(&self, unit: &Unit) -> Result<Vec<f64>> {
        Ok(self.to(unit)?.to_vec())
    }

    /// Elementwise sum after converting `other` into this unit.
    pub fn try_add(&self, other: &Quantity) -> Result<Quantity> {
        let other = other.to(&self.unit)?;
        self.check_len(&other)?;
        Ok(Quantity::new(&self.values + &other.values, self.unit.clone()))
    }

    /// Elementwise difference after converting `other` into this unit.
    pub fn try_sub(&self, other: &Quantity) -> Result<Quantity> {
        let other = other.to(&self.unit)?;
        self.check_len(&other)?;
        Ok(Quantity::new(&self.values - &other.values, self.unit.clone()))
    }

    fn check_len(&self, other: &Quantity) -> Result<()> {
        if self.len() != other.len() {
            return Err(Error::invalid(format!(
                "length mismatch: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        Ok(())
    }

    /// Midpoints of consecutive pairs taken from `self` (start) and `other` (stop).
    pub fn midpoints(&self, other: &Quantity) -> Result<Quantity> {
        let sum = self.try_add(other)?;
        Ok(&sum / 2.0)
    }
}

impl Add<f64> for &Quantity {
    type Output = Quantity;

    fn add(self, rhs: f64) -> Quantity {
        Quantity::new(&self.values + rhs, self.unit.clone())
    }
}

impl Sub<f64> for &Quantity {
    type Output = Quantity;

    fn sub(self, rhs: f64) -> Quantity {
        Quantity::new(&self.values - rhs, self.unit.clone())
    }
}

impl Mul<f64> for &Quantity {
    type Output = Quantity;

    fn mul(self, rhs: f64) -> Quantity {
        Quantity::new(&self.values * rhs, self.unit.clone())
    }
}

impl Div<f64> for &Quantity {
    type Output = Quantity;

    fn div(self, rhs: f64) -> Quantity {
        Quantity::new(&self.values / rhs, self.unit.clone())
    }
}
