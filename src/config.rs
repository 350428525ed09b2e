use crate::error::{RenderError, RenderResult};

/// Local workgroup size the kernel declares. The dispatch grid is derived
/// from it, so it must match the kernel's `workgroup_size` exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub width: u32,
    pub height: u32,
}

impl WorkgroupSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for WorkgroupSize {
    fn default() -> Self {
        Self::new(16, 8)
    }
}

impl std::str::FromStr for WorkgroupSize {
    type Err = String;

    /// Parses `WxH`, e.g. `16x8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
        let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
        let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
        Ok(Self::new(width, height))
    }
}

/// Where the kernel accumulates samples.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Storage buffer, 3 floats per pixel.
    #[default]
    Buffer,
    /// `Rgba32Float` storage texture, copied out after the final pass.
    Image,
}

impl OutputKind {
    pub fn channels(self) -> u32 {
        match self {
            OutputKind::Buffer => 3,
            OutputKind::Image => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Number of sample batches (passes) accumulated into the output.
    pub sample_batches: u32,
    pub workgroup: WorkgroupSize,
    pub output: OutputKind,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            sample_batches: 32,
            workgroup: WorkgroupSize::default(),
            output: OutputKind::Buffer,
        }
    }
}

impl RenderConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn sample_batches(mut self, sample_batches: u32) -> Self {
        self.sample_batches = sample_batches;
        self
    }

    pub fn workgroup(mut self, workgroup: WorkgroupSize) -> Self {
        self.workgroup = workgroup;
        self
    }

    pub fn output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::scene(format!(
                "output resolution {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.sample_batches == 0 {
            return Err(RenderError::scene("sample batch count must be at least 1"));
        }
        if self.workgroup.width == 0 || self.workgroup.height == 0 {
            return Err(RenderError::pipeline(format!(
                "workgroup size {}x{} is empty",
                self.workgroup.width, self.workgroup.height
            )));
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn channels(&self) -> u32 {
        self.output.channels()
    }

    /// Size in bytes of the tightly packed float image.
    pub fn image_byte_size(&self) -> u64 {
        self.pixel_count() * self.channels() as u64 * std::mem::size_of::<f32>() as u64
    }

    pub fn dispatch_grid(&self) -> [u32; 3] {
        dispatch_grid(self.width, self.height, self.workgroup)
    }
}

/// Number of workgroups covering `width x height`, rounding up.
pub fn dispatch_grid(width: u32, height: u32, workgroup: WorkgroupSize) -> [u32; 3] {
    [
        width.div_ceil(workgroup.width),
        height.div_ceil(workgroup.height),
        1,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_for_reference_resolution() {
        let config = RenderConfig::default();
        assert_eq!(config.dispatch_grid(), [50, 75, 1]);
    }

    #[test]
    fn grid_rounds_partial_tiles_up() {
        assert_eq!(dispatch_grid(801, 601, WorkgroupSize::new(16, 8)), [51, 76, 1]);
        assert_eq!(dispatch_grid(1, 1, WorkgroupSize::new(16, 8)), [1, 1, 1]);
        assert_eq!(dispatch_grid(64, 64, WorkgroupSize::new(8, 8)), [8, 8, 1]);
    }

    #[test]
    fn empty_resolution_is_an_invalid_scene() {
        let err = RenderConfig::new(0, 0).validate().unwrap_err();
        assert!(matches!(err, RenderError::InvalidScene(_)));
        let err = RenderConfig::new(800, 0).validate().unwrap_err();
        assert!(matches!(err, RenderError::InvalidScene(_)));
    }

    #[test]
    fn zero_workgroup_is_rejected() {
        let err = RenderConfig::default()
            .workgroup(WorkgroupSize::new(0, 8))
            .validate()
            .unwrap_err();
        assert!(matches!(err, RenderError::PipelineBuild(_)));
    }

    #[test]
    fn image_size_follows_output_kind() {
        let buffer = RenderConfig::new(4, 2);
        assert_eq!(buffer.image_byte_size(), 4 * 2 * 3 * 4);
        let image = RenderConfig::new(4, 2).output(OutputKind::Image);
        assert_eq!(image.image_byte_size(), 4 * 2 * 4 * 4);
    }

    #[test]
    fn workgroup_parses_from_cli_text() {
        assert_eq!("16x8".parse::<WorkgroupSize>(), Ok(WorkgroupSize::new(16, 8)));
        assert_eq!("8X8".parse::<WorkgroupSize>(), Ok(WorkgroupSize::new(8, 8)));
        assert!("16".parse::<WorkgroupSize>().is_err());
        assert!("ax8".parse::<WorkgroupSize>().is_err());
    }
}
