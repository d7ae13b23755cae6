use crate::error::{MontraError, MontraResult};

/// Behaviour for inputs outside the breakpoint range.
///
/// `Clamp` returns the nearest boundary output and is the mode every caller in
/// this crate uses. `Identity` passes the input through unchanged and exists
/// only as a defensive escape hatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extrapolate {
    Clamp,
    Identity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterpolateOptions {
    pub left: Extrapolate,
    pub right: Extrapolate,
}

impl Default for InterpolateOptions {
    fn default() -> Self {
        Self {
            left: Extrapolate::Clamp,
            right: Extrapolate::Clamp,
        }
    }
}

/// Piecewise-linear interpolation over ordered breakpoints.
///
/// `input_range` and `output_range` must have the same length (>= 2) and
/// `input_range` must be strictly increasing; anything else is a fatal
/// configuration error. The function is pure and deterministic; it underlies
/// every transition in the compositor.
pub fn interpolate(
    input: f64,
    input_range: &[f64],
    output_range: &[f64],
    opts: InterpolateOptions,
) -> MontraResult<f64> {
    if input_range.len() != output_range.len() {
        return Err(MontraError::configuration(
            "interpolate input/output ranges must have the same length",
        ));
    }
    if input_range.len() < 2 {
        return Err(MontraError::configuration(
            "interpolate ranges must have at least 2 breakpoints",
        ));
    }
    for pair in input_range.windows(2) {
        if !(pair[0] < pair[1]) {
            return Err(MontraError::configuration(
                "interpolate input range must be strictly increasing",
            ));
        }
    }

    if input < input_range[0] {
        return Ok(match opts.left {
            Extrapolate::Clamp => output_range[0],
            Extrapolate::Identity => input,
        });
    }
    if input > input_range[input_range.len() - 1] {
        return Ok(match opts.right {
            Extrapolate::Clamp => output_range[output_range.len() - 1],
            Extrapolate::Identity => input,
        });
    }

    for i in 0..input_range.len() - 1 {
        if input >= input_range[i] && input <= input_range[i + 1] {
            let ratio = (input - input_range[i]) / (input_range[i + 1] - input_range[i]);
            return Ok(output_range[i] + ratio * (output_range[i + 1] - output_range[i]));
        }
    }

    Ok(output_range[0])
}

pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
