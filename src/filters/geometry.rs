// SPDX-License-Identifier: GPL-3.0-only

//! Quad geometry shared by render filters and sinks

use serde::{Deserialize, Serialize};

/// Full-screen quad corners: top-left, top-right, bottom-right, bottom-left
pub const QUAD_VERTICES: [f32; 8] = [-1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0];

/// Two triangles over [`QUAD_VERTICES`]
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Orientation applied when sampling the input texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextureRotation {
    #[default]
    None,
    Left,
    Right,
    FlipVertical,
    FlipHorizontal,
}

impl TextureRotation {
    pub const ALL: [TextureRotation; 5] = [
        TextureRotation::None,
        TextureRotation::Left,
        TextureRotation::Right,
        TextureRotation::FlipVertical,
        TextureRotation::FlipHorizontal,
    ];

    /// Texture coordinates matching the corner order of [`QUAD_VERTICES`]
    pub fn tex_coords(&self) -> [f32; 8] {
        match self {
            TextureRotation::None => [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            TextureRotation::Left => [1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0],
            TextureRotation::Right => [0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0],
            TextureRotation::FlipVertical => [0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            TextureRotation::FlipHorizontal => [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(TextureRotation::None),
            "left" => Some(TextureRotation::Left),
            "right" => Some(TextureRotation::Right),
            "flip-vertical" | "flipv" => Some(TextureRotation::FlipVertical),
            "flip-horizontal" | "fliph" => Some(TextureRotation::FlipHorizontal),
            _ => None,
        }
    }
}

/// How an input is placed onto an output of a different aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillMode {
    /// Fill the output, distorting the aspect ratio
    Stretch,
    /// Fit inside the output, letterboxing the rest
    #[default]
    AspectFit,
    /// Cover the output, cropping what falls outside
    AspectFill,
}

impl FillMode {
    pub const ALL: [FillMode; 3] = [FillMode::Stretch, FillMode::AspectFit, FillMode::AspectFill];

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "stretch" => Some(FillMode::Stretch),
            "fit" | "aspect-fit" => Some(FillMode::AspectFit),
            "fill" | "aspect-fill" => Some(FillMode::AspectFill),
            _ => None,
        }
    }

    /// Scale quad vertices so an input of size `from` lands on an output of size `to`
    ///
    /// Even components (x) are scaled by the horizontal ratio, odd
    /// components (y) by the vertical ratio. Zero-sized inputs or outputs
    /// leave the vertices unchanged.
    pub fn convert(&self, vertices: &[f32; 8], from: (u32, u32), to: (u32, u32)) -> [f32; 8] {
        let (from_w, from_h) = (from.0 as f32, from.1 as f32);
        let (to_w, to_h) = (to.0 as f32, to.1 as f32);
        if from_w == 0.0 || from_h == 0.0 || to_w == 0.0 || to_h == 0.0 {
            return *vertices;
        }

        let aspect = from_w / from_h;
        let target_aspect = to_w / to_h;

        let (x_ratio, y_ratio) = match self {
            FillMode::Stretch => return *vertices,
            FillMode::AspectFit => {
                if aspect > target_aspect {
                    (1.0, (from_h / to_h) * (to_w / from_w))
                } else {
                    ((to_h / from_h) * (from_w / to_w), 1.0)
                }
            }
            FillMode::AspectFill => {
                if aspect > target_aspect {
                    ((from_w / to_w) * (to_h / from_h), 1.0)
                } else {
                    (1.0, (from_h / to_h) * (to_w / from_w))
                }
            }
        };

        let mut result = *vertices;
        for (i, value) in result.iter_mut().enumerate() {
            *value *= if i % 2 == 0 { x_ratio } else { y_ratio };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_is_identity() {
        let out = FillMode::Stretch.convert(&QUAD_VERTICES, (1920, 1080), (640, 480));
        assert_eq!(out, QUAD_VERTICES);
    }

    #[test]
    fn test_matching_aspect_is_identity() {
        for mode in FillMode::ALL {
            let out = mode.convert(&QUAD_VERTICES, (1920, 1080), (1280, 720));
            for (a, b) in out.iter().zip(QUAD_VERTICES.iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_tall_input_fits_with_pillarbox() {
        // 3:4 into 16:9: width shrinks, height untouched
        let out = FillMode::AspectFit.convert(&QUAD_VERTICES, (3, 4), (16, 9));
        assert!(out[0].abs() < 1.0);
        assert_eq!(out[1].abs(), 1.0);
    }

    #[test]
    fn test_degenerate_sizes_unchanged() {
        let out = FillMode::AspectFill.convert(&QUAD_VERTICES, (0, 1080), (1280, 720));
        assert_eq!(out, QUAD_VERTICES);
    }

    #[test]
    fn test_rotation_tables_are_distinct() {
        for (i, a) in TextureRotation::ALL.iter().enumerate() {
            for b in &TextureRotation::ALL[i + 1..] {
                assert_ne!(a.tex_coords(), b.tex_coords());
            }
        }
        assert_eq!(TextureRotation::parse("LEFT"), Some(TextureRotation::Left));
    }
}
