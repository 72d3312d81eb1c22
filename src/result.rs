use ndarray::Array2;

/// Axis-aligned text rectangle. Coordinates are inclusive-exclusive when used for cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// Maps a box from a `from` sized space into a `to` sized space, truncating toward zero.
    pub fn rescale(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let fx = to.0 as f64 / from.0 as f64;
        let fy = to.1 as f64 / from.1 as f64;
        Self {
            x_min: (self.x_min as f64 * fx) as i32,
            y_min: (self.y_min as f64 * fy) as i32,
            x_max: (self.x_max as f64 * fx) as i32,
            y_max: (self.y_max as f64 * fy) as i32,
        }
    }

    /// `(x, y, width, height)` of the part of the box inside a `width`x`height` image.
    /// Out of range edges are clamped the same way slicing past an array end is.
    pub fn clamped(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clamp = |value: i32, max: u32| (value.max(0) as u32).min(max);
        let x0 = clamp(self.x_min, width);
        let y0 = clamp(self.y_min, height);
        let x1 = clamp(self.x_max, width);
        let y1 = clamp(self.y_max, height);
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Per-pixel detector output at detection-map resolution.
#[derive(Debug, Clone)]
pub struct ScoreMaps {
    pub text: Array2<f32>,
    pub link: Array2<f32>,
}

impl ScoreMaps {
    /// `(width, height)` of the maps.
    pub fn dim(&self) -> (usize, usize) {
        let (height, width) = self.text.dim();
        (width, height)
    }
}
