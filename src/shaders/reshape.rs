use super::{float, ShaderBuilder};
use crate::error::BenchError;

const MAX_PIVOTS: usize = 9;
const MAX_PIECES: usize = MAX_PIVOTS - 1;
const MAX_MMR_ORDER: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReshapeMethod {
    /// Second order polynomial in the component's own signal.
    #[default]
    Poly,
    /// Multivariate multiple regression over all three components.
    Mmr,
}

/// Piecewise reshaping curve for one output component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoviReshapeComponent {
    pub num_pivots: usize,
    pub pivots: [f32; MAX_PIVOTS],
    pub method: [ReshapeMethod; MAX_PIECES],
    pub poly_coeffs: [[f32; 3]; MAX_PIECES],
    pub mmr_order: [u8; MAX_PIECES],
    pub mmr_constant: [f32; MAX_PIECES],
    /// Per order: weights of x, y, z, xy, xz, yz and xyz.
    pub mmr_coeffs: [[[f32; 7]; 3]; MAX_PIECES],
}

impl DoviReshapeComponent {
    pub const EMPTY: Self = Self {
        num_pivots: 0,
        pivots: [0.0; MAX_PIVOTS],
        method: [ReshapeMethod::Poly; MAX_PIECES],
        poly_coeffs: [[0.0; 3]; MAX_PIECES],
        mmr_order: [0; MAX_PIECES],
        mmr_constant: [0.0; MAX_PIECES],
        mmr_coeffs: [[[0.0; 7]; 3]; MAX_PIECES],
    };

    fn pieces(&self) -> usize {
        self.num_pivots.saturating_sub(1)
    }
}

/// Dolby Vision reshaping for the three signal components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoviMetadata {
    pub comp: [DoviReshapeComponent; 3],
}

const LUMA_POLY: DoviReshapeComponent = DoviReshapeComponent {
    num_pivots: 8,
    pivots: [
        0.0,
        0.004_887_585_5,
        0.042_033_236,
        0.177_908_11,
        0.428_152_5,
        0.678_396_9,
        0.928_641_26,
        1.0,
        0.0,
    ],
    poly_coeffs: [
        [0.002_909_302_7, 2.300_197, 50.144_604],
        [0.007_252_574, 1.881_190_5, -4.494_437_7],
        [0.015_012_384, 1.611_066, -1.648_330_8],
        [0.049_857_14, 1.205_911_4, -0.430_627_1],
        [0.087_801_93, 1.018_452_4, -0.196_693_54],
        [0.120_447_636, 0.920_134_2, -0.122_338_77],
        [2.124_308_3, -3.309_132_8, 2.108_939_4],
        [0.0; 3],
    ],
    ..DoviReshapeComponent::EMPTY
};

const fn linear_poly(c0: f32, c1: f32) -> DoviReshapeComponent {
    let mut comp = DoviReshapeComponent::EMPTY;
    comp.num_pivots = 2;
    comp.pivots[1] = 1.0;
    comp.poly_coeffs[0] = [c0, c1, 0.0];
    comp
}

const fn mmr(constant: f32, first: [f32; 7], second: [f32; 7]) -> DoviReshapeComponent {
    let mut comp = DoviReshapeComponent::EMPTY;
    comp.num_pivots = 2;
    comp.pivots[1] = 1.0;
    comp.method[0] = ReshapeMethod::Mmr;
    comp.mmr_order[0] = 2;
    comp.mmr_constant[0] = constant;
    comp.mmr_coeffs[0] = [first, second, [0.0; 7]];
    comp
}

impl DoviMetadata {
    /// Polynomial reshaping on every component.
    pub const POLY: Self = Self {
        comp: [
            LUMA_POLY,
            linear_poly(-0.397_901_18, 1.859_080_3),
            linear_poly(-0.399_355_53, 1.855_916_3),
        ],
    };

    /// Polynomial luma with second order MMR chroma.
    pub const MMR: Self = Self {
        comp: [
            LUMA_POLY,
            mmr(
                -0.398,
                [0.021, 1.859, -0.014, 0.0, 0.0, 0.0, 0.0],
                [0.0, -0.052, 0.0, 0.011, 0.0, -0.006, 0.0],
            ),
            mmr(
                -0.399,
                [0.018, -0.012, 1.856, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, -0.047, 0.0, 0.009, -0.005, 0.0],
            ),
        ],
    };
}

const MMR_TERMS: &str = "\
fn mmr_terms(c: vec3<f32>) -> array<vec4<f32>, 2> {
    return array<vec4<f32>, 2>(
        vec4<f32>(c.x, c.y, c.z, c.x * c.y),
        vec4<f32>(c.x * c.z, c.y * c.z, c.x * c.y * c.z, 0.0),
    );
}
";

fn piece_expr(
    sh: &mut ShaderBuilder<'_>,
    comp: &DoviReshapeComponent,
    piece: usize,
    channel: usize,
) -> Result<String, BenchError> {
    match comp.method[piece] {
        ReshapeMethod::Poly => {
            let [c0, c1, c2] = comp.poly_coeffs[piece];
            let p = sh.param([c0, c1, c2, 0.0]);
            Ok(format!("{p}.x + s * ({p}.y + s * {p}.z)"))
        }
        ReshapeMethod::Mmr => {
            let order = comp.mmr_order[piece];
            if order == 0 || order > MAX_MMR_ORDER {
                return Err(BenchError::Record(format!(
                    "MMR order {order} on component {channel}"
                )));
            }
            sh.global(MMR_TERMS);
            let constant = sh.param([comp.mmr_constant[piece], 0.0, 0.0, 0.0]);
            let mut expr = format!("{constant}.x");
            for k in 0..order as usize {
                let w = comp.mmr_coeffs[piece][k];
                let lo = sh.param([w[0], w[1], w[2], w[3]]);
                let hi = sh.param([w[4], w[5], w[6], 0.0]);
                let t0 = vec!["t[0]"; k + 1].join(" * ");
                let t1 = vec!["t[1]"; k + 1].join(" * ");
                expr.push_str(&format!(" + dot({lo}, {t0}) + dot({hi}, {t1})"));
            }
            Ok(expr)
        }
    }
}

/// Maps `color` through per-component piecewise reshaping curves.
pub fn dovi_reshape(sh: &mut ShaderBuilder<'_>, meta: &DoviMetadata) -> Result<(), BenchError> {
    sh.require_input("reshaping")?;
    let uses_mmr = meta
        .comp
        .iter()
        .any(|c| c.method[..c.pieces().min(MAX_PIECES)].contains(&ReshapeMethod::Mmr));

    let mut body = String::from("{\n    let src = clamp(color.rgb, vec3<f32>(0.0), vec3<f32>(1.0));\n");
    if uses_mmr {
        sh.global(MMR_TERMS);
        body.push_str("    let t = mmr_terms(src);\n");
    }
    body.push_str("    var res = src;\n");

    for (channel, comp) in meta.comp.iter().enumerate() {
        if !(2..=MAX_PIVOTS).contains(&comp.num_pivots) {
            return Err(BenchError::Record(format!(
                "{} pivots on component {channel}",
                comp.num_pivots
            )));
        }
        body.push_str(&format!("    {{\n        let s = src[{channel}];\n"));
        for piece in 0..comp.pieces() {
            let expr = piece_expr(sh, comp, piece, channel)?;
            if piece == 0 {
                body.push_str(&format!("        var r = {expr};\n"));
            } else {
                let pivot = float(comp.pivots[piece]);
                body.push_str(&format!(
                    "        if (s >= {pivot}) {{\n            r = {expr};\n        }}\n"
                ));
            }
        }
        body.push_str(&format!("        res[{channel}] = r;\n    }}\n"));
    }
    body.push_str(
        "    color = vec4<f32>(clamp(res, vec3<f32>(0.0), vec3<f32>(1.0)), color.a);\n}",
    );
    sh.push(body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_poly(comp: &DoviReshapeComponent, piece: usize, s: f32) -> f32 {
        let [c0, c1, c2] = comp.poly_coeffs[piece];
        c0 + s * (c1 + s * c2)
    }

    #[test]
    fn luma_pieces_meet_at_pivots() {
        let comp = &DoviMetadata::POLY.comp[0];
        for piece in 1..comp.pieces() {
            let s = comp.pivots[piece];
            let below = eval_poly(comp, piece - 1, s);
            let above = eval_poly(comp, piece, s);
            assert!((below - above).abs() < 5e-3, "pivot {piece}: {below} vs {above}");
        }
    }

    #[test]
    fn luma_curve_spans_the_signal_range() {
        let comp = &DoviMetadata::POLY.comp[0];
        assert!(eval_poly(comp, 0, 0.0) < 0.01);
        let top = eval_poly(comp, comp.pieces() - 1, 1.0);
        assert!((top - 0.924).abs() < 1e-3, "{top}");
    }

    #[test]
    fn presets_are_well_formed() {
        for meta in [DoviMetadata::POLY, DoviMetadata::MMR] {
            for comp in &meta.comp {
                assert!((2..=MAX_PIVOTS).contains(&comp.num_pivots));
                assert!(comp.pivots[..comp.num_pivots].windows(2).all(|w| w[0] < w[1]));
            }
        }
        assert_eq!(DoviMetadata::MMR.comp[1].method[0], ReshapeMethod::Mmr);
        assert_eq!(DoviMetadata::MMR.comp[2].mmr_order[0], 2);
        assert_eq!(DoviMetadata::POLY.comp[1].method[0], ReshapeMethod::Poly);
    }
}
