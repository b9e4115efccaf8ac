use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Interfaces must satisfy left <= middle <= right, got ({left}, {middle}, {right})")]
pub struct InterfaceOrderError {
    pub left: f64,
    pub middle: f64,
    pub right: f64,
}

/// The side of an ensemble a path starts or ends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl Side {
    pub fn code(self) -> char {
        match self {
            Side::Left => 'L',
            Side::Right => 'R',
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Order-parameter thresholds bounding one path ensemble.
///
/// `left` and `right` are the outer interfaces that terminate propagation, `middle` is
/// the interface a valid path must cross. The triple is fixed for the lifetime of an
/// ensemble and can only be constructed in sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interfaces {
    left: f64,
    middle: f64,
    right: f64,
}

impl Interfaces {
    pub fn new(left: f64, middle: f64, right: f64) -> Result<Self, InterfaceOrderError> {
        if left <= middle && middle <= right {
            Ok(Self {
                left,
                middle,
                right,
            })
        } else {
            Err(InterfaceOrderError {
                left,
                middle,
                right,
            })
        }
    }

    #[inline]
    pub fn left(&self) -> f64 {
        self.left
    }

    #[inline]
    pub fn middle(&self) -> f64 {
        self.middle
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.right
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.left, self.middle, self.right]
    }

    /// Classifies an order value as lying at or beyond one of the outer interfaces.
    pub fn side_of(&self, order: f64) -> Option<Side> {
        if order <= self.left {
            Some(Side::Left)
        } else if order >= self.right {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Whether `order` lies in the half-open band `[left, right)` a shooting point may use.
    pub fn contains_for_shooting(&self, order: f64) -> bool {
        self.left <= order && order < self.right
    }
}

impl fmt::Display for Interfaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.left, self.middle, self.right)
    }
}
