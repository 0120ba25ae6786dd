// gpu/dispatch.rs — Workgroup shape and dispatch extent planning.
//
// The workgroup size is baked into the WGSL program at build time (the
// `{{WG_X}}` / `{{WG_Y}}` placeholders), so every dispatch of a session uses
// the same local shape. What varies per call is the number of groups needed
// to cover the grid:
//
//   exact    width % x == 0 and height % y == 0; every invocation maps to a
//            real cell.
//   padded   ceil division; the trailing groups hang past the grid and the
//            shader's bounds guard discards those invocations. Only allowed
//            when the session is configured for partial workgroups.
//
// Everything here is a pure function of sizes and limits, so it is tested
// without a device.

use std::fmt;

use crate::error::ConvError;

/// Local 2D workgroup shape of the convolution program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    pub const fn new(x: u32, y: u32) -> Self {
        WorkgroupSize { x, y }
    }

    /// Invocations per workgroup (x * y), saturating.
    pub fn total(&self) -> u32 {
        self.x.saturating_mul(self.y)
    }

    /// Check the shape against the device's compute limits.
    ///
    /// Returns a human-readable reason on failure.
    pub fn check(&self, limits: &wgpu::Limits) -> Result<(), String> {
        if self.x == 0 || self.y == 0 {
            return Err("workgroup dimensions must be non-zero".into());
        }
        if self.x > limits.max_compute_workgroup_size_x {
            return Err(format!(
                "x = {} exceeds the device limit of {}",
                self.x, limits.max_compute_workgroup_size_x
            ));
        }
        if self.y > limits.max_compute_workgroup_size_y {
            return Err(format!(
                "y = {} exceeds the device limit of {}",
                self.y, limits.max_compute_workgroup_size_y
            ));
        }
        if self.total() > limits.max_compute_invocations_per_workgroup {
            return Err(format!(
                "{} invocations exceed the device limit of {}",
                self.total(),
                limits.max_compute_invocations_per_workgroup
            ));
        }
        Ok(())
    }
}

impl Default for WorkgroupSize {
    /// 8×8 = 64 invocations; fits every adapter wgpu exposes.
    fn default() -> Self {
        WorkgroupSize { x: 8, y: 8 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.x, self.y)
    }
}

/// Number of workgroups to dispatch for one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub groups_x: u32,
    pub groups_y: u32,
    /// True when the groups overhang the grid and the bounds guard is live.
    pub padded: bool,
}

/// Plan the dispatch of a `width × height` grid.
///
/// # Errors
/// `InvalidDispatchShape` when the workgroup violates the device limits, when
/// the grid does not divide evenly and `allow_partial` is false, or when the
/// group count exceeds `max_compute_workgroups_per_dimension`.
pub fn plan(
    width: u32,
    height: u32,
    workgroup: WorkgroupSize,
    allow_partial: bool,
    limits: &wgpu::Limits,
) -> Result<DispatchPlan, ConvError> {
    let reject = |reason: String| ConvError::InvalidDispatchShape {
        width,
        height,
        workgroup,
        reason,
    };

    workgroup.check(limits).map_err(reject)?;
    if width == 0 || height == 0 {
        return Err(reject("grid has no cells".into()));
    }

    let exact = width % workgroup.x == 0 && height % workgroup.y == 0;
    if !exact && !allow_partial {
        return Err(reject(
            "grid is not a multiple of the workgroup and partial workgroups are disabled".into(),
        ));
    }

    let groups_x = width.div_ceil(workgroup.x);
    let groups_y = height.div_ceil(workgroup.y);
    let max = limits.max_compute_workgroups_per_dimension;
    if groups_x > max || groups_y > max {
        return Err(reject(format!(
            "{groups_x}×{groups_y} workgroups exceed the per-dimension limit of {max}"
        )));
    }

    Ok(DispatchPlan { groups_x, groups_y, padded: !exact })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> wgpu::Limits {
        wgpu::Limits::default()
    }

    #[test]
    fn test_exact_grouping() {
        let p = plan(512, 512, WorkgroupSize::default(), false, &limits()).unwrap();
        assert_eq!(p, DispatchPlan { groups_x: 64, groups_y: 64, padded: false });
    }

    #[test]
    fn test_padded_grouping() {
        // 100 / 8 = 12.5 → 13 groups; the last one covers 96–103.
        let p = plan(100, 37, WorkgroupSize::default(), true, &limits()).unwrap();
        assert_eq!(p.groups_x, 13);
        assert_eq!(p.groups_y, 5);
        assert!(p.padded);
    }

    #[test]
    fn test_uneven_rejected_without_partial() {
        let err = plan(100, 64, WorkgroupSize::default(), false, &limits()).unwrap_err();
        assert!(matches!(
            err,
            ConvError::InvalidDispatchShape { width: 100, height: 64, .. }
        ));
        assert_eq!(err.stage(), Some(crate::error::Stage::Dispatch));
    }

    #[test]
    fn test_zero_workgroup_rejected() {
        let err = plan(64, 64, WorkgroupSize::new(0, 8), true, &limits()).unwrap_err();
        assert!(err.to_string().contains("non-zero"), "{err}");
    }

    #[test]
    fn test_invocation_limit() {
        let l = wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            ..limits()
        };
        assert!(WorkgroupSize::new(16, 16).check(&l).is_ok());
        let reason = WorkgroupSize::new(16, 17).check(&l).unwrap_err();
        assert!(reason.contains("272"), "{reason}");
    }

    #[test]
    fn test_group_count_limit() {
        let l = wgpu::Limits {
            max_compute_workgroups_per_dimension: 10,
            ..limits()
        };
        assert!(plan(80, 80, WorkgroupSize::default(), false, &l).is_ok());
        assert!(plan(88, 8, WorkgroupSize::default(), false, &l).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkgroupSize::new(16, 8).to_string(), "16×8");
        assert_eq!(WorkgroupSize::default().total(), 64);
    }
}
