/// m/s^2
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// air density (kg/m^3) at altitude (m)
/// approximated using a linear function from 0m and 3000m data from standard atmosphere model
pub fn approximate_air_density(altitude_asl: f32) -> f32 {
    (1.225 - altitude_asl * 0.0001053).max(0.0)
}

/// speed of sound (m/s) at altitude (m)
/// approximated using a linear function from 0m and 3000m data from standard atmosphere model
pub fn approximate_speed_of_sound(altitude_asl: f32) -> f32 {
    340.29 - altitude_asl * 0.003903
}

/// Piecewise linear interpolation over evenly spaced `values` covering t = 0..1.
/// Values of `t` outside 0..1 extrapolate the first / last segment.
pub fn lerp(t: f32, values: &[f32]) -> f32 {
    match values.len() {
        0 => 0.0,
        1 => values[0],
        len => {
            let segments = (len - 1) as f32;
            let position = t * segments;

            let i = if position <= 0.0 {
                0
            } else {
                (position as usize).min(len - 2)
            };

            let local_t = position - i as f32;
            (1.0 - local_t) * values[i] + local_t * values[i + 1]
        }
    }
}
