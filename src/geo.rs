use serde::Serialize;

pub const KM_PER_DEGREE_LAT: f64 = 111.0;
const EARTH_RADIUS_KM: f64 = 6371.0;
const COMPASS_POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }

    pub fn query_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("lamin", format!("{:.6}", self.lat_min)),
            ("lomin", format!("{:.6}", self.lon_min)),
            ("lamax", format!("{:.6}", self.lat_max)),
            ("lomax", format!("{:.6}", self.lon_max)),
        ]
    }
}

pub fn compute_bounding_box(home_lat: f64, home_lon: f64, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / KM_PER_DEGREE_LAT;
    let lon_delta = radius_km / (KM_PER_DEGREE_LAT * home_lat.to_radians().cos());
    BoundingBox {
        lat_min: home_lat - lat_delta,
        lat_max: home_lat + lat_delta,
        lon_min: home_lon - lon_delta,
        lon_max: home_lon + lon_delta,
    }
}

pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let x = d_lon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    (x.atan2(y).to_degrees() + 360.0) % 360.0
}

pub fn compass_point(bearing: f64) -> &'static str {
    let normalized = bearing.rem_euclid(360.0);
    let index = ((normalized + 22.5) / 45.0) as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[index]
}
