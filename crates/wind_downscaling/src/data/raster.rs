use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::Path,
};

use bincode_derive::{Decode, Encode};
use thiserror::Error;

/// A named field stored as `[time, y, x]` in row-major order.
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub values: Vec<f32>,
}

/// Geo-referenced raster with projected `x`/`y` axes, a `time` axis (unix seconds)
/// and any number of variables sharing those axes.
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct Raster {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub time: Vec<i64>,
    variables: Vec<Variable>,
}

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Unable to access raster file due to {:?}", .0)]
    Io(#[from] io::Error),
    #[error("Unable to encode raster due to {:?}", .0)]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Unable to decode raster due to {:?}", .0)]
    Decode(#[from] bincode::error::DecodeError),
    #[error("Variable {} has {} values but the raster axes require {}", .name, .found, .expected)]
    ShapeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Variable {} is not part of the raster", .0)]
    UnknownVariable(String),
    #[error("The requested extent x={:?} y={:?} does not contain any pixel", .0, .1)]
    EmptySubset((f64, f64), (f64, f64)),
}

impl Raster {
    pub fn new(x: Vec<f64>, y: Vec<f64>, time: Vec<i64>) -> Self {
        Self {
            x,
            y,
            time,
            variables: vec![],
        }
    }

    pub fn with_variable(mut self, name: &str, values: Vec<f32>) -> Result<Self, RasterError> {
        self.insert_variable(name, values)?;
        Ok(self)
    }

    /// Adds a variable, replacing an existing one with the same name.
    pub fn insert_variable(&mut self, name: &str, values: Vec<f32>) -> Result<(), RasterError> {
        let expected = self.len();
        if values.len() != expected {
            return Err(RasterError::ShapeMismatch {
                name: name.into(),
                expected,
                found: values.len(),
            });
        }
        match self.variables.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.values = values,
            None => self.variables.push(Variable {
                name: name.into(),
                values,
            }),
        }
        Ok(())
    }

    /// `(time, y, x)` extents.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.time.len(), self.y.len(), self.x.len())
    }

    fn len(&self) -> usize {
        self.time.len() * self.y.len() * self.x.len()
    }

    pub fn index(&self, t: usize, y: usize, x: usize) -> usize {
        (t * self.y.len() + y) * self.x.len() + x
    }

    pub fn variable(&self, name: &str) -> Result<&[f32], RasterError> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.values.as_slice())
            .ok_or_else(|| RasterError::UnknownVariable(name.into()))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn value(&self, name: &str, t: usize, y: usize, x: usize) -> Result<f32, RasterError> {
        Ok(self.variable(name)?[self.index(t, y, x)])
    }

    /// Restricts the raster to the pixels whose coordinates fall into the
    /// inclusive `x_range`/`y_range` box. Axis order is preserved.
    pub fn subset(&self, x_range: (f64, f64), y_range: (f64, f64)) -> Result<Self, RasterError> {
        let inside = |axis: &[f64], (lo, hi): (f64, f64)| -> Vec<usize> {
            axis.iter()
                .enumerate()
                .filter(|(_, v)| **v >= lo && **v <= hi)
                .map(|(i, _)| i)
                .collect()
        };
        let xs = inside(&self.x, x_range);
        let ys = inside(&self.y, y_range);
        if xs.is_empty() || ys.is_empty() {
            return Err(RasterError::EmptySubset(x_range, y_range));
        }

        let mut out = Raster::new(
            xs.iter().map(|i| self.x[*i]).collect(),
            ys.iter().map(|i| self.y[*i]).collect(),
            self.time.clone(),
        );
        for variable in &self.variables {
            let mut values = Vec::with_capacity(out.len());
            for t in 0..self.time.len() {
                for y in &ys {
                    for x in &xs {
                        values.push(variable.values[self.index(t, *y, *x)]);
                    }
                }
            }
            out.insert_variable(&variable.name, values)?;
        }
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<(), RasterError> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RasterError> {
        let mut reader = BufReader::new(File::open(path)?);
        let raster = bincode::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(raster)
    }
}
