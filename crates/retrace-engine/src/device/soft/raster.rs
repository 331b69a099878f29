//! Scan conversion and per-fragment operations.
//!
//! Window coordinates have their origin at the bottom-left corner with pixel
//! centres at `+0.5`. Triangles use a top-left fill rule so shared edges are
//! covered exactly once.

use crate::device::texel::Texel;
use crate::device::types::{
    BlendFactor, BlendOp, Face, FormatClass, FrontFace, Rect, SamplerDesc, Topology,
};
use crate::state::RasterState;

use super::surface::Surface;

/// Interpolated per-vertex outputs.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Varyings {
    pub color: [f32; 4],
    pub uv: [f32; 2],
}

impl Varyings {
    fn scale(self, k: f32) -> Varyings {
        Varyings {
            color: self.color.map(|c| c * k),
            uv: self.uv.map(|c| c * k),
        }
    }

    fn add(self, o: Varyings) -> Varyings {
        Varyings {
            color: std::array::from_fn(|i| self.color[i] + o.color[i]),
            uv: std::array::from_fn(|i| self.uv[i] + o.uv[i]),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShadedVertex {
    pub clip: [f32; 4],
    pub vary: Varyings,
}

#[derive(Debug, Copy, Clone)]
struct WindowVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    vary: Varyings,
}

/// The surfaces a draw writes into, taken out of the device for its
/// duration.
#[derive(Debug, Default)]
pub struct Targets {
    pub colors: Vec<Surface>,
    pub depth: Option<Surface>,
}

impl Targets {
    /// Common extent of every attachment.
    pub fn bounds(&self) -> Rect {
        let mut r: Option<Rect> = None;
        for s in self.colors.iter().chain(self.depth.as_ref()) {
            r = Some(match r {
                Some(r) => r.intersect(s.rect()),
                None => s.rect(),
            });
        }
        r.unwrap_or_default()
    }
}

/// Fragment stage inputs that stay fixed for one draw.
pub struct Pipeline<'a> {
    pub state: &'a RasterState,
    /// Texture unit 0 with its effective sampler.
    pub texture: Option<(&'a Surface, SamplerDesc)>,
    pub bounds: Rect,
}

impl Pipeline<'_> {
    fn to_window(&self, v: &ShadedVertex) -> Option<WindowVertex> {
        let [x, y, z, w] = v.clip;
        if w <= 0.0 {
            return None;
        }
        let vp = self.state.viewport;
        let [near, far] = self.state.depth_range;
        let (nx, ny, nz) = (x / w, y / w, z / w);
        Some(WindowVertex {
            x: vp.x as f32 + (nx + 1.0) * 0.5 * vp.width as f32,
            y: vp.y as f32 + (ny + 1.0) * 0.5 * vp.height as f32,
            z: near + (nz + 1.0) * 0.5 * (far - near),
            inv_w: 1.0 / w,
            vary: v.vary,
        })
    }

    /// Assembles `vs` into primitives and rasterizes them in order.
    pub fn draw(&self, t: &mut Targets, topology: Topology, vs: &[ShadedVertex]) {
        match topology {
            Topology::Points => vs.iter().for_each(|v| self.point(t, v)),
            Topology::Lines => {
                for pair in vs.chunks_exact(2) {
                    self.line(t, &pair[0], &pair[1]);
                }
            }
            Topology::LineStrip | Topology::LineLoop => {
                for pair in vs.windows(2) {
                    self.line(t, &pair[0], &pair[1]);
                }
                if topology == Topology::LineLoop && vs.len() > 2 {
                    self.line(t, &vs[vs.len() - 1], &vs[0]);
                }
            }
            Topology::Triangles => {
                for tri in vs.chunks_exact(3) {
                    self.triangle(t, &tri[0], &tri[1], &tri[2]);
                }
            }
            Topology::TriangleStrip => {
                for i in 0..vs.len().saturating_sub(2) {
                    // Odd triangles swap their first two vertices to keep winding.
                    let (a, b) = if i % 2 == 0 { (i, i + 1) } else { (i + 1, i) };
                    self.triangle(t, &vs[a], &vs[b], &vs[i + 2]);
                }
            }
            Topology::TriangleFan => {
                for i in 1..vs.len().saturating_sub(1) {
                    self.triangle(t, &vs[0], &vs[i], &vs[i + 1]);
                }
            }
        }
    }

    pub fn point(&self, t: &mut Targets, v: &ShadedVertex) {
        if let Some(w) = self.to_window(v) {
            self.fragment(t, w.x.floor() as i32, w.y.floor() as i32, w.z, w.vary);
        }
    }

    /// One-pixel-wide line stepping along the major axis.
    pub fn line(&self, t: &mut Targets, a: &ShadedVertex, b: &ShadedVertex) {
        let (Some(a), Some(b)) = (self.to_window(a), self.to_window(b)) else {
            return;
        };
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let steps = dx.abs().max(dy.abs()).round() as i32;
        if steps == 0 {
            self.fragment(t, a.x.floor() as i32, a.y.floor() as i32, a.z, a.vary);
            return;
        }
        // The last pixel belongs to the next segment.
        for i in 0..steps {
            let k = (i as f32 + 0.5) / steps as f32;
            let x = a.x + dx * k;
            let y = a.y + dy * k;
            let z = a.z + (b.z - a.z) * k;
            let vary = a.vary.scale(1.0 - k).add(b.vary.scale(k));
            self.fragment(t, x.floor() as i32, y.floor() as i32, z, vary);
        }
    }

    pub fn triangle(&self, t: &mut Targets, a: &ShadedVertex, b: &ShadedVertex, c: &ShadedVertex) {
        let (Some(a), Some(b), Some(c)) = (self.to_window(a), self.to_window(b), self.to_window(c))
        else {
            return;
        };
        let area = edge(&a, &b, c.x, c.y);
        if area == 0.0 {
            return;
        }

        let ccw = area > 0.0;
        let front = match self.state.front_face {
            FrontFace::Ccw => ccw,
            FrontFace::Cw => !ccw,
        };
        if self.state.cull {
            let culled = match self.state.cull_face {
                Face::Front => front,
                Face::Back => !front,
                Face::FrontAndBack => true,
            };
            if culled {
                return;
            }
        }

        // Reorder to counter-clockwise so every inside test is `>= 0`.
        let (a, b) = if ccw { (a, b) } else { (b, a) };
        let area = area.abs();

        let offset = self.depth_offset(&a, &b, &c, area);

        let (right, top) = (
            self.bounds.x as f32 + self.bounds.width as f32,
            self.bounds.y as f32 + self.bounds.height as f32,
        );
        let min_x = a.x.min(b.x).min(c.x).floor().max(self.bounds.x as f32) as i32;
        let max_x = a.x.max(b.x).max(c.x).ceil().min(right) as i32;
        let min_y = a.y.min(b.y).min(c.y).floor().max(self.bounds.y as f32) as i32;
        let max_y = a.y.max(b.y).max(c.y).ceil().min(top) as i32;

        for py in min_y..max_y {
            for px in min_x..max_x {
                let (sx, sy) = (px as f32 + 0.5, py as f32 + 0.5);
                let w0 = edge(&b, &c, sx, sy);
                let w1 = edge(&c, &a, sx, sy);
                let w2 = edge(&a, &b, sx, sy);
                if !covers(w0, &b, &c) || !covers(w1, &c, &a) || !covers(w2, &a, &b) {
                    continue;
                }
                let (l0, l1, l2) = (w0 / area, w1 / area, w2 / area);
                let z = l0 * a.z + l1 * b.z + l2 * c.z + offset;

                // Perspective-correct varyings.
                let p0 = l0 * a.inv_w;
                let p1 = l1 * b.inv_w;
                let p2 = l2 * c.inv_w;
                let sum = p0 + p1 + p2;
                let vary = a
                    .vary
                    .scale(p0 / sum)
                    .add(b.vary.scale(p1 / sum))
                    .add(c.vary.scale(p2 / sum));
                self.fragment(t, px, py, z, vary);
            }
        }
    }

    fn depth_offset(&self, a: &WindowVertex, b: &WindowVertex, c: &WindowVertex, area: f32) -> f32 {
        if !self.state.polygon_offset_fill {
            return 0.0;
        }
        let [factor, units] = self.state.polygon_offset;
        let dzdx = ((b.z - a.z) * (c.y - a.y) - (c.z - a.z) * (b.y - a.y)) / area;
        let dzdy = ((c.z - a.z) * (b.x - a.x) - (b.z - a.z) * (c.x - a.x)) / area;
        factor * dzdx.abs().max(dzdy.abs()) + units / 16_777_216.0
    }

    fn shade(&self, vary: Varyings) -> [f32; 4] {
        match &self.texture {
            Some((surface, sampler)) => {
                let texel = surface.sample(vary.uv, sampler);
                std::array::from_fn(|i| vary.color[i] * texel[i])
            }
            None => vary.color,
        }
    }

    fn fragment(&self, t: &mut Targets, x: i32, y: i32, z: f32, vary: Varyings) {
        let s = self.state;
        if !contains(self.bounds, x, y) {
            return;
        }
        if s.scissor_test && !contains(s.scissor, x, y) {
            return;
        }
        let z = z.clamp(0.0, 1.0);

        if let Some(ds) = t.depth.as_mut() {
            let stencil_on = s.stencil_test && ds.has_stencil();
            let func = s.stencil_func;
            let reference = func.reference.clamp(0, 255) as u8;
            let write_mask = (s.stencil_mask & 0xff) as u8;
            let stencil_write = |ds: &mut Surface, op: crate::device::types::StencilOp| {
                let old = ds.stencil(x, y);
                let new = op.apply(old, reference);
                ds.set_stencil(x, y, (old & !write_mask) | (new & write_mask));
            };

            if stencil_on {
                let m = (func.mask & 0xff) as u8;
                if !func.func.test(reference & m, ds.stencil(x, y) & m) {
                    stencil_write(ds, s.stencil_op.fail);
                    return;
                }
            }
            if s.depth_test && ds.has_depth() {
                if !s.depth_func.test(z, ds.depth(x, y)) {
                    if stencil_on {
                        stencil_write(ds, s.stencil_op.zfail);
                    }
                    return;
                }
                if s.depth_mask {
                    ds.set_depth(x, y, z);
                }
            }
            if stencil_on {
                stencil_write(ds, s.stencil_op.zpass);
            }
        }

        let color = self.shade(vary);
        for surface in &mut t.colors {
            write_color(s, surface, x, y, color);
        }
    }
}

fn contains(r: Rect, x: i32, y: i32) -> bool {
    let (x, y) = (i64::from(x), i64::from(y));
    x >= i64::from(r.x)
        && y >= i64::from(r.y)
        && x < i64::from(r.x) + i64::from(r.width)
        && y < i64::from(r.y) + i64::from(r.height)
}

/// Twice the signed area of (a, b, p).
fn edge(a: &WindowVertex, b: &WindowVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Top-left rule for a counter-clockwise triangle.
fn covers(w: f32, a: &WindowVertex, b: &WindowVertex) -> bool {
    if w > 0.0 {
        return true;
    }
    if w < 0.0 {
        return false;
    }
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    // With y up and CCW winding, top edges run right-to-left and left
    // edges run downward.
    (dy == 0.0 && dx < 0.0) || dy < 0.0
}

fn write_color(s: &RasterState, surface: &mut Surface, x: i32, y: i32, color: [f32; 4]) {
    let old = surface.texel(x, y);
    let new = match surface.format.class() {
        FormatClass::Uint | FormatClass::Sint => Texel::Float(color).convert(surface.format),
        class => {
            let clamp = class == FormatClass::Unorm;
            let src = if clamp { color.map(|c| c.clamp(0.0, 1.0)) } else { color };
            let out = if s.blend {
                blend(s, src, old.to_f32())
            } else {
                src
            };
            Texel::Float(out)
        }
    };
    surface.set_texel(x, y, new.masked(old.convert(surface.format), s.color_mask));
}

pub fn blend(s: &RasterState, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let k = s.blend_color;
    std::array::from_fn(|i| {
        let (sf, df, op) = if i < 3 {
            (s.blend_func.src, s.blend_func.dst, s.blend_equation.rgb)
        } else {
            (s.blend_func.src_alpha, s.blend_func.dst_alpha, s.blend_equation.alpha)
        };
        let a = src[i] * factor(sf, i, src, dst, k);
        let b = dst[i] * factor(df, i, src, dst, k);
        match op {
            BlendOp::Add => a + b,
            BlendOp::Subtract => a - b,
            BlendOp::ReverseSubtract => b - a,
            BlendOp::Min => src[i].min(dst[i]),
            BlendOp::Max => src[i].max(dst[i]),
        }
    })
}

fn factor(f: BlendFactor, i: usize, src: [f32; 4], dst: [f32; 4], k: [f32; 4]) -> f32 {
    match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcColor => src[i],
        BlendFactor::OneMinusSrcColor => 1.0 - src[i],
        BlendFactor::DstColor => dst[i],
        BlendFactor::OneMinusDstColor => 1.0 - dst[i],
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
        BlendFactor::ConstantColor => k[i],
        BlendFactor::OneMinusConstantColor => 1.0 - k[i],
        BlendFactor::ConstantAlpha => k[3],
        BlendFactor::OneMinusConstantAlpha => 1.0 - k[3],
        BlendFactor::SrcAlphaSaturate => {
            if i == 3 {
                1.0
            } else {
                src[3].min(1.0 - dst[3])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Limits;
    use crate::device::types::{CompareFunc, TextureFormat};
    use crate::state::BlendFunc;

    fn vertex(x: f32, y: f32) -> ShadedVertex {
        ShadedVertex {
            clip: [x, y, 0.0, 1.0],
            vary: Varyings {
                color: [1.0, 0.0, 0.0, 1.0],
                uv: [0.0, 0.0],
            },
        }
    }

    fn targets(w: u32, h: u32) -> Targets {
        Targets {
            colors: vec![Surface::new(w, h, TextureFormat::Rgba8).unwrap()],
            depth: Some(Surface::new(w, h, TextureFormat::Depth24Stencil8).unwrap()),
        }
    }

    fn covered(t: &Targets) -> usize {
        let s = &t.colors[0];
        let mut n = 0;
        for y in 0..s.height as i32 {
            for x in 0..s.width as i32 {
                if s.texel(x, y).to_f32()[0] > 0.0 {
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn full_screen_quad_covers_every_pixel_once() {
        let state = RasterState::new(&Limits::default(), 4, 4);
        let mut t = targets(4, 4);
        let p = Pipeline {
            state: &state,
            texture: None,
            bounds: t.bounds(),
        };
        let (a, b, c, d) = (
            vertex(-1.0, -1.0),
            vertex(1.0, -1.0),
            vertex(1.0, 1.0),
            vertex(-1.0, 1.0),
        );
        p.triangle(&mut t, &a, &b, &c);
        p.triangle(&mut t, &a, &c, &d);
        assert_eq!(covered(&t), 16);
    }

    #[test]
    fn back_faces_are_culled_when_enabled() {
        let mut state = RasterState::new(&Limits::default(), 4, 4);
        state.cull = true;
        let mut t = targets(4, 4);
        let p = Pipeline {
            state: &state,
            texture: None,
            bounds: t.bounds(),
        };
        // Clockwise in window space.
        p.triangle(&mut t, &vertex(-1.0, -1.0), &vertex(-1.0, 1.0), &vertex(1.0, -1.0));
        assert_eq!(covered(&t), 0);
        p.triangle(&mut t, &vertex(-1.0, -1.0), &vertex(1.0, -1.0), &vertex(-1.0, 1.0));
        assert!(covered(&t) > 0);
    }

    #[test]
    fn scissor_limits_coverage() {
        let mut state = RasterState::new(&Limits::default(), 4, 4);
        state.scissor_test = true;
        state.scissor = Rect::new(0, 0, 2, 1);
        let mut t = targets(4, 4);
        let p = Pipeline {
            state: &state,
            texture: None,
            bounds: t.bounds(),
        };
        p.triangle(&mut t, &vertex(-1.0, -1.0), &vertex(3.0, -1.0), &vertex(-1.0, 3.0));
        assert_eq!(covered(&t), 2);
    }

    #[test]
    fn depth_test_rejects_farther_fragments() {
        let mut state = RasterState::new(&Limits::default(), 1, 1);
        state.depth_test = true;
        state.depth_func = CompareFunc::Less;
        let mut t = targets(1, 1);
        t.depth.as_mut().unwrap().fill_depth(Rect::new(0, 0, 1, 1), 0.25);
        let p = Pipeline {
            state: &state,
            texture: None,
            bounds: t.bounds(),
        };
        p.triangle(&mut t, &vertex(-1.0, -1.0), &vertex(3.0, -1.0), &vertex(-1.0, 3.0));
        assert_eq!(covered(&t), 0);
    }

    #[test]
    fn alpha_blending() {
        let mut state = RasterState::new(&Limits::default(), 1, 1);
        state.blend = true;
        state.blend_func = BlendFunc {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
        };
        let out = blend(&state, [1.0, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(out, [0.5, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn lines_light_major_axis_pixels() {
        let state = RasterState::new(&Limits::default(), 4, 4);
        let mut t = targets(4, 4);
        let p = Pipeline {
            state: &state,
            texture: None,
            bounds: t.bounds(),
        };
        p.line(&mut t, &vertex(-1.0, -0.75), &vertex(1.0, -0.75));
        assert_eq!(covered(&t), 4);
    }
}
