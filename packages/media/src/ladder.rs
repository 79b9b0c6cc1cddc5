//! Resolution ladder for video variants.

/// Bounding boxes `(label, width, height)`, highest first.
pub const LADDER: [(&str, u32, u32); 9] = [
    ("4320p", 7680, 4320),
    ("2160p", 3840, 2160),
    ("1440p", 2560, 1440),
    ("1080p", 1920, 1080),
    ("720p", 1280, 720),
    ("480p", 854, 480),
    ("360p", 640, 360),
    ("240p", 426, 240),
    ("144p", 256, 144),
];

/// One planned output rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

fn even(n: u32) -> u32 {
    (n & !1).max(2)
}

/// `num * mul / div` rounded to the nearest even integer.
fn scale_even(num: u32, mul: u32, div: u32) -> u32 {
    let div = u64::from(div.max(1));
    let scaled = (u64::from(num) * u64::from(mul) + div) / (2 * div) * 2;
    even(u32::try_from(scaled).unwrap_or(u32::MAX))
}

/// Fit `(width, height)` inside the `(box_w, box_h)` box preserving aspect
/// ratio. Returns `None` when fitting would upscale the source.
///
/// Dimensions are even as required by yuv420p.
pub fn fit(width: u32, height: u32, box_w: u32, box_h: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    // Width is the limiting side when box_w / width <= box_h / height.
    let width_bound = u64::from(box_w) * u64::from(height) <= u64::from(box_h) * u64::from(width);
    let (w, h) = if width_bound {
        if box_w > width {
            return None;
        }
        (box_w, scale_even(height, box_w, width))
    } else {
        if box_h > height {
            return None;
        }
        (scale_even(width, box_h, height), box_h)
    };
    Some((even(w), even(h)))
}

/// Variants to produce for a source of the given size, highest first.
///
/// Rungs whose fitted size would exceed the source are skipped. A source
/// smaller than every rung yields a single variant at its own size.
pub fn plan_variants(width: u32, height: u32) -> Vec<Variant> {
    let mut planned: Vec<Variant> = LADDER
        .iter()
        .filter_map(|(label, box_w, box_h)| {
            let (w, h) = fit(width, height, *box_w, *box_h)?;
            Some(Variant {
                label: (*label).to_string(),
                width: w,
                height: h,
            })
        })
        .collect();

    if planned.is_empty() {
        let h = even(height);
        planned.push(Variant {
            label: format!("{h}p"),
            width: even(width),
            height: h,
        });
    }
    planned
}
