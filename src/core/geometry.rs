use crate::domain::model::Coord;
use std::f64::consts::PI;

/// MC2 單位與 WGS84 角度的換算係數
pub const MC2_UNITS_PER_DEGREE: f64 = 11_930_464.711_1;

/// 一個 MC2 單位在赤道上的長度（公尺）
pub const MC2_SCALE_TO_METER: f64 = 40_075_016.686 / 4_294_967_296.0;

const INV_RADIAN_FACTOR: f64 = PI / 2_147_483_648.0;

pub fn mc2_to_degrees(value: i32) -> f64 {
    f64::from(value) / MC2_UNITS_PER_DEGREE
}

pub fn degrees_to_mc2(value: f64) -> i32 {
    (value * MC2_UNITS_PER_DEGREE).round() as i32
}

fn cos_lat(a: Coord, b: Coord) -> f64 {
    (INV_RADIAN_FACTOR * f64::from(a.lat / 2 + b.lat / 2)).cos()
}

/// 由北方順時針量起的弧度，範圍 [0, 2π)
pub fn angle_from_north(from: Coord, to: Coord) -> f64 {
    let coslat = cos_lat(from, to);
    let delta_lon = f64::from(to.lon) - f64::from(from.lon);
    let delta_lat = f64::from(to.lat) - f64::from(from.lat);
    let angle = (coslat * delta_lon).atan2(delta_lat);
    if angle < 0.0 {
        angle + 2.0 * PI
    } else {
        angle
    }
}

/// 弧度截斷為整數角度
pub fn angle_degrees(from: Coord, to: Coord) -> u16 {
    (angle_from_north(from, to) * 180.0 / 3.141_592_65) as u16
}

/// 相反方向的角度
pub fn reverse_degrees(angle: u16) -> u16 {
    if angle < 180 {
        angle + 180
    } else {
        angle - 180
    }
}

/// 路段角度：以象限計算、四捨五入到整數度
pub fn segment_angle(a: Coord, b: Coord) -> u32 {
    let delta_y = f64::from(b.lat) - f64::from(a.lat);
    let delta_x = f64::from(b.lon) - f64::from(a.lon);
    let to_degrees = |radians: f64| radians / (2.0 * PI) * 360.0;

    let alfa = if delta_x > 0.0 {
        if delta_y >= 0.0 {
            to_degrees((delta_y / delta_x).atan())
        } else {
            to_degrees((delta_y.abs() / delta_x).atan()) + 270.0
        }
    } else if delta_x < 0.0 {
        if delta_y >= 0.0 {
            let alfa = to_degrees((delta_y / delta_x.abs()).atan()) + 90.0;
            if alfa == 90.0 {
                alfa + 90.0
            } else {
                alfa
            }
        } else {
            to_degrees((delta_y.abs() / delta_x.abs()).atan()) + 180.0
        }
    } else if delta_y > 0.0 {
        // atan(+inf)
        90.0
    } else if delta_y < 0.0 {
        to_degrees((delta_y.abs() / delta_x.abs()).atan()) + 180.0
    } else {
        0.0
    };

    (alfa + 0.5) as u32
}

/// 以平均緯度線性化的距離（公尺）
pub fn distance_m(a: Coord, b: Coord) -> f64 {
    let coslat = cos_lat(a, b);
    let delta_lat = f64::from(b.lat) - f64::from(a.lat);
    let delta_lon = (f64::from(b.lon) - f64::from(a.lon)) * coslat;
    (delta_lat * delta_lat + delta_lon * delta_lon).sqrt() * MC2_SCALE_TO_METER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_from_north_quadrants() {
        let origin = Coord::new(0, 0);
        assert_eq!(angle_degrees(origin, Coord::new(1000, 0)), 0);
        assert_eq!(angle_degrees(origin, Coord::new(0, 1000)), 90);
        assert_eq!(angle_degrees(origin, Coord::new(-1000, 0)), 180);
        assert_eq!(angle_degrees(origin, Coord::new(0, -1000)), 270);
    }

    #[test]
    fn test_reverse_degrees() {
        assert_eq!(reverse_degrees(10), 190);
        assert_eq!(reverse_degrees(180), 0);
        assert_eq!(reverse_degrees(270), 90);
    }

    #[test]
    fn test_segment_angle_is_counter_clockwise_from_east() {
        let origin = Coord::new(0, 0);
        assert_eq!(segment_angle(origin, Coord::new(0, 100)), 0);
        assert_eq!(segment_angle(origin, Coord::new(100, 100)), 45);
        assert_eq!(segment_angle(origin, Coord::new(100, 0)), 90);
        assert_eq!(segment_angle(origin, Coord::new(0, -100)), 180);
        assert_eq!(segment_angle(origin, Coord::new(-100, -100)), 225);
        assert_eq!(segment_angle(origin, Coord::new(-100, 100)), 315);
    }

    #[test]
    fn test_distance_scales_with_latitude() {
        let stockholm = degrees_to_mc2(59.33);
        assert!((mc2_to_degrees(stockholm) - 59.33).abs() < 1e-6);
        let a = Coord::new(stockholm, degrees_to_mc2(18.06));
        let one_km_north = Coord::new(stockholm + degrees_to_mc2(1.0 / 111.32), a.lon);
        let distance = distance_m(a, one_km_north);
        assert!((distance - 1000.0).abs() < 5.0, "distance was {}", distance);

        let east = Coord::new(a.lat, a.lon + degrees_to_mc2(0.01));
        let expected = 0.01 * 111_320.0 * (59.33f64).to_radians().cos();
        assert!((distance_m(a, east) - expected).abs() < 5.0);
    }
}
