use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::{background_services::archive::ParseError, utils::Coordinate};

#[derive(Clone, Debug, PartialEq, FromRow, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub stop_lat: f64,
    pub stop_long: f64,
    /// Latitude exactly as it appeared in stops.txt
    pub stop_lat_raw: String,
    /// Longitude exactly as it appeared in stops.txt
    pub stop_long_raw: String,
}

impl Stop {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.stop_lat, self.stop_long)
    }
}

/// A row of the GTFS stops.txt file. Columns other than these are ignored.
#[derive(Debug, Deserialize)]
pub struct GtfsStop {
    pub stop_id: String,
    pub stop_name: String,
    pub stop_lat: String,
    pub stop_lon: String,
}

impl GtfsStop {
    /// `line` is the line of stops.txt the row came from and is only used for error reporting
    pub fn try_into_stop(self, line: u64) -> Result<Stop, ParseError> {
        let stop_lat = parse_coordinate(&self.stop_lat, line, "stop_lat", 90.0)?;
        let stop_long = parse_coordinate(&self.stop_lon, line, "stop_lon", 180.0)?;

        if self.stop_id.is_empty() {
            return Err(ParseError::InvalidField {
                line,
                field: "stop_id",
                value: self.stop_id,
            });
        }

        Ok(Stop {
            id: self.stop_id,
            name: self.stop_name,
            stop_lat,
            stop_long,
            stop_lat_raw: self.stop_lat,
            stop_long_raw: self.stop_lon,
        })
    }
}

fn parse_coordinate(
    raw: &str,
    line: u64,
    field: &'static str,
    bound: f64,
) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidField {
        line,
        field,
        value: raw.to_string(),
    };

    let value: f64 = raw.trim().parse().map_err(|_| invalid())?;

    if !value.is_finite() || value.abs() > bound {
        return Err(invalid());
    }

    Ok(value)
}
