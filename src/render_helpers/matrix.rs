//! 3x3 projection matrices in the layout a GL renderer consumes.
//!
//! The unit quad `(0,0)..(1,1)` is mapped into normalized device
//! coordinates, where `(-1,1)` is the top-left corner of the buffer.

use smithay::utils::{Physical, Rectangle, Transform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f32; 9]);

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    pub fn multiply(&self, other: &Matrix) -> Matrix {
        let a = &self.0;
        let b = &other.0;
        let mut out = [0.0f32; 9];
        for row in 0..3 {
            for col in 0..3 {
                out[row * 3 + col] = a[row * 3] * b[col]
                    + a[row * 3 + 1] * b[3 + col]
                    + a[row * 3 + 2] * b[6 + col];
            }
        }
        Matrix(out)
    }

    pub fn translate(&self, x: f32, y: f32) -> Matrix {
        self.multiply(&Matrix([1.0, 0.0, x, 0.0, 1.0, y, 0.0, 0.0, 1.0]))
    }

    pub fn scale(&self, x: f32, y: f32) -> Matrix {
        self.multiply(&Matrix([x, 0.0, 0.0, 0.0, y, 0.0, 0.0, 0.0, 1.0]))
    }

    pub fn transform(&self, transform: Transform) -> Matrix {
        self.multiply(&transform_matrix(transform))
    }

    /// Projection for a `width`x`height` buffer shown with `transform`.
    pub fn projection(width: i32, height: i32, transform: Transform) -> Matrix {
        let t = transform_matrix(transform).0;
        let x = 2.0 / width.max(1) as f32;
        let y = 2.0 / height.max(1) as f32;

        let m0 = x * t[0];
        let m1 = x * t[1];
        let m3 = y * -t[3];
        let m4 = y * -t[4];
        Matrix([
            m0,
            m1,
            -(1.0f32).copysign(m0 + m1),
            m3,
            m4,
            -(1.0f32).copysign(m3 + m4),
            0.0,
            0.0,
            1.0,
        ])
    }

    /// Matrix that draws a texture into `rect`, with the texture contents
    /// rotated by `transform`, under the output `projection`.
    pub fn project_box(
        rect: Rectangle<i32, Physical>,
        transform: Transform,
        projection: &Matrix,
    ) -> Matrix {
        let mut mat = Matrix::IDENTITY
            .translate(rect.loc.x as f32, rect.loc.y as f32)
            .scale(rect.size.w as f32, rect.size.h as f32);

        if transform != Transform::Normal {
            mat = mat
                .translate(0.5, 0.5)
                .transform(transform)
                .translate(-0.5, -0.5);
        }

        projection.multiply(&mat)
    }

    /// Apply the matrix to a 2D point.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }
}

fn transform_matrix(transform: Transform) -> Matrix {
    Matrix(match transform {
        Transform::Normal => [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        Transform::_90 => [0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        Transform::_180 => [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0],
        Transform::_270 => [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        Transform::Flipped => [-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        Transform::Flipped90 => [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        Transform::Flipped180 => [1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0],
        Transform::Flipped270 => [0.0, -1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
    })
}
