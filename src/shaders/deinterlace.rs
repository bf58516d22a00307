use super::{ShaderBuilder, LUMA};
use crate::error::BenchError;
use crate::gpu::SourceImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Even lines belong to the current field.
    Top,
    Bottom,
}

impl Field {
    fn parity(self) -> i32 {
        match self {
            Field::Top => 0,
            Field::Bottom => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeinterlaceAlgorithm {
    /// Both fields as they are.
    Weave,
    /// Missing lines averaged from their neighbours.
    Bob,
    /// Spatial prediction clamped by temporal neighbours.
    Yadif,
}

/// Frames around the one being deinterlaced. Yadif falls back to bob when
/// either neighbour is missing.
pub struct DeinterlaceSource<'a> {
    pub prev: Option<&'a SourceImage>,
    pub cur: &'a SourceImage,
    pub next: Option<&'a SourceImage>,
    pub field: Field,
}

const LOAD: &str = "\
fn ld(t: texture_2d<f32>, p: vec2<i32>) -> vec4<f32> {
    let dims = vec2<i32>(textureDimensions(t));
    return textureLoad(t, clamp(p, vec2<i32>(0), dims - 1), 0);
}
";

const BOB: &str = "\
fn bob(cur: texture_2d<f32>, p: vec2<i32>, parity: i32) -> vec4<f32> {
    if ((p.y & 1) == parity) {
        return ld(cur, p);
    }
    return 0.5 * (ld(cur, p + vec2<i32>(0, -1)) + ld(cur, p + vec2<i32>(0, 1)));
}
";

const YADIF: &str = "\
fn yadif_score(cur: texture_2d<f32>, p: vec2<i32>, j: i32) -> f32 {
    return luma(abs(ld(cur, p + vec2<i32>(j - 1, -1)) - ld(cur, p + vec2<i32>(-j - 1, 1))))
        + luma(abs(ld(cur, p + vec2<i32>(j, -1)) - ld(cur, p + vec2<i32>(-j, 1))))
        + luma(abs(ld(cur, p + vec2<i32>(j + 1, -1)) - ld(cur, p + vec2<i32>(-j + 1, 1))));
}

fn yadif(prev: texture_2d<f32>, cur: texture_2d<f32>, next: texture_2d<f32>, p: vec2<i32>, parity: i32) -> vec4<f32> {
    if ((p.y & 1) == parity) {
        return ld(cur, p);
    }
    let up = vec2<i32>(0, -1);
    let dn = vec2<i32>(0, 1);
    let c = ld(cur, p + up);
    let e = ld(cur, p + dn);
    let d = 0.5 * (ld(prev, p) + ld(next, p));
    let td0 = abs(ld(prev, p) - ld(next, p));
    let td1 = 0.5 * (abs(ld(prev, p + up) - c) + abs(ld(prev, p + dn) - e));
    let td2 = 0.5 * (abs(ld(next, p + up) - c) + abs(ld(next, p + dn) - e));
    var diff = max(0.5 * td0, max(td1, td2));

    var pred = 0.5 * (c + e);
    var score = yadif_score(cur, p, 0);
    for (var j = -1; j >= -2; j--) {
        let s = yadif_score(cur, p, j);
        if (s >= score) {
            break;
        }
        score = s;
        pred = 0.5 * (ld(cur, p + vec2<i32>(j, -1)) + ld(cur, p + vec2<i32>(-j, 1)));
    }
    for (var j = 1; j <= 2; j++) {
        let s = yadif_score(cur, p, j);
        if (s >= score) {
            break;
        }
        score = s;
        pred = 0.5 * (ld(cur, p + vec2<i32>(j, -1)) + ld(cur, p + vec2<i32>(-j, 1)));
    }

    let b = 0.5 * (ld(prev, p + 2 * up) + ld(next, p + 2 * up));
    let f = 0.5 * (ld(prev, p + 2 * dn) + ld(next, p + 2 * dn));
    let hi = max(max(d - e, d - c), min(b - c, f - e));
    let lo = min(min(d - e, d - c), max(b - c, f - e));
    diff = max(max(diff, lo), -hi);
    return clamp(pred, d - diff, d + diff);
}
";

pub fn deinterlace<'a>(
    sh: &mut ShaderBuilder<'a>,
    src: &DeinterlaceSource<'a>,
    algorithm: DeinterlaceAlgorithm,
) -> Result<(), BenchError> {
    let cur = sh.bind_texture(src.cur.view());
    let parity = src.field.parity();
    sh.global(LOAD);

    match (algorithm, src.prev, src.next) {
        (DeinterlaceAlgorithm::Yadif, Some(prev), Some(next)) => {
            let prev = sh.bind_texture(prev.view());
            let next = sh.bind_texture(next.view());
            sh.global(LUMA);
            sh.global(YADIF);
            sh.push(format!(
                "color = yadif({prev}, {cur}, {next}, vec2<i32>(pos), {parity});"
            ));
        }
        (DeinterlaceAlgorithm::Weave, ..) => {
            sh.push(format!("color = ld({cur}, vec2<i32>(pos));"));
        }
        _ => {
            sh.global(BOB);
            sh.push(format!("color = bob({cur}, vec2<i32>(pos), {parity});"));
        }
    }
    sh.set_input();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_parity() {
        assert_eq!(Field::Top.parity(), 0);
        assert_eq!(Field::Bottom.parity(), 1);
    }
}
