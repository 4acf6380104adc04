// The level curve - pure xp <-> level math.
//
// xp_for_level(L) = floor(100 * L^1.5)
// level_from_xp(xp) = the largest L with xp_for_level(L) <= xp
//
// 100 * L^1.5 is the same number as sqrt(10_000 * L^3), so the curve is
// evaluated with an integer square root and never depends on float rounding.

/// XP multiplier of the curve (the `100` in `100 * L^1.5`).
const CURVE_SCALE: u128 = 100;

/// Total XP required to reach `level`.
pub fn xp_for_level(level: u32) -> u64 {
    let l = level as u128;
    isqrt(CURVE_SCALE * CURVE_SCALE * l * l * l) as u64
}

/// Level reached with `xp` total XP.
///
/// Starts from the closed form `floor((xp / 100)^(2/3))` and nudges the
/// estimate until it sits exactly between two thresholds, so that
/// `level_from_xp(xp_for_level(l)) == l` holds for every level.
pub fn level_from_xp(xp: u64) -> u32 {
    let estimate = (xp as f64 / CURVE_SCALE as f64).powf(2.0 / 3.0).floor();
    let mut level = if estimate >= u32::MAX as f64 {
        u32::MAX
    } else {
        estimate as u32
    };

    while level > 0 && xp_for_level(level) > xp {
        level -= 1;
    }
    while level < u32::MAX && xp_for_level(level + 1) <= xp {
        level += 1;
    }

    level
}

/// XP still missing before the next level.
pub fn xp_to_next_level(xp: u64) -> u64 {
    let level = level_from_xp(xp);
    xp_for_level(level.saturating_add(1)).saturating_sub(xp)
}

/// Progress inside the current level as `(xp_into_level, level_span)`.
pub fn level_progress(xp: u64) -> (u64, u64) {
    let level = level_from_xp(xp);
    let floor = xp_for_level(level);
    let ceiling = xp_for_level(level.saturating_add(1));
    (xp - floor, ceiling.saturating_sub(floor).max(1))
}

fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut root = (n as f64).sqrt() as u128;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}
