//! 地理距离计算

/// 地球平均半径（米）
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 使用 haversine 公式计算两点间的大圆距离（米）。
///
/// 不校验输入范围，调用方负责先构造合法坐标。
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // 浮点误差可能让对跖点的 a 略大于 1
    let a = a.min(1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// 沿赤道向东偏移指定米数后的经度，测试中用于构造精确距离的点。
#[cfg(any(test, feature = "testing"))]
pub fn equator_longitude_offset(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_METERS).to_degrees()
}
