// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The LDraw color palette: a 512-slot table plus direct color numbers.
//!
//! Slots 0..=15 are the classic colors, 32..=47 their transparent
//! variants, and 256..=511 the legacy dither bank blending two classic
//! colors. Color numbers at or above `0x2000000` encode RGB values
//! directly and never touch the table. `0 !COLOUR` metas (typically from
//! `ldconfig.ldr`) and LDLite `0 COLOR` metas update the table as they
//! parse.

use rustc_hash::FxHashMap;

/// Alpha applied to transparent palette colors
pub const TRANSPARENT_ALPHA: u8 = 110;

/// Everything known about one color number
#[derive(Debug, Clone, PartialEq)]
pub struct ColorInfo {
    pub name: String,
    pub rgba: [u8; 4],
    pub edge_color_number: u32,
    pub luminance: Option<f32>,
    /// Specular reflection as RGBA components
    pub specular: Option<[f32; 4]>,
    pub shininess: Option<f32>,
    pub chrome: bool,
    pub rubber: bool,
}

impl Default for ColorInfo {
    fn default() -> Self {
        ColorInfo {
            name: String::new(),
            rgba: [0, 0, 0, 0],
            edge_color_number: 255,
            luminance: None,
            specular: None,
            shininess: None,
            chrome: false,
            rubber: false,
        }
    }
}

impl ColorInfo {
    /// Slots that were never assigned keep the zeroed color with the
    /// placeholder edge number.
    fn is_undefined(&self) -> bool {
        self.rgba == [0, 0, 0, 0] && self.edge_color_number == 255
    }
}

const TA: u8 = TRANSPARENT_ALPHA;

/// The built-in table: classic LDraw colors and their transparent
/// variants. Slots 16 and 24 stay undefined on purpose; they mean
/// "inherited" and "inherited edge".
const STANDARD_COLORS: &[(u32, &str, [u8; 4], u32)] = &[
    (0, "Black", [51, 51, 51, 255], 8),
    (1, "Blue", [0, 51, 178, 255], 9),
    (2, "Green", [0, 127, 51, 255], 10),
    (3, "Teal", [0, 181, 166, 255], 11),
    (4, "Red", [204, 0, 0, 255], 12),
    (5, "Dark Pink", [255, 51, 153, 255], 13),
    (6, "Brown", [102, 51, 0, 255], 8),
    (7, "Gray", [153, 153, 153, 255], 8),
    (8, "Dark Gray", [102, 102, 88, 255], 0),
    (9, "Light Blue", [0, 128, 255, 255], 1),
    (10, "Light Green", [51, 255, 102, 255], 2),
    (11, "Turquoise", [171, 253, 249, 255], 3),
    (12, "Light Red", [255, 0, 0, 255], 4),
    (13, "Pink", [255, 176, 204, 255], 5),
    (14, "Yellow", [255, 229, 0, 255], 8),
    (15, "White", [255, 255, 255, 255], 8),
    (17, "Mint Green", [102, 240, 153, 255], 0),
    (18, "Light Yellow", [255, 255, 128, 255], 0),
    (19, "Tan", [204, 170, 102, 255], 0),
    (20, "Light Purple", [224, 204, 240, 255], 0),
    (21, "Glow In The Dark", [224, 255, 176, 255], 0x47c07c0),
    (22, "Purple", [153, 51, 153, 255], 0),
    (23, "Violet Blue", [76, 0, 204, 255], 0),
    (25, "Orange", [255, 102, 0, 255], 0x4000000),
    (26, "Magenta", [255, 51, 153, 255], 0x4000000),
    (27, "Yellow Green", [173, 221, 80, 255], 0),
    (28, "Dark Tan", [197, 151, 80, 255], 0),
    (32, "Trans Black", [102, 102, 102, TA], 40),
    (33, "Trans Blue", [0, 0, 153, TA], 41),
    (34, "Trans Green", [0, 80, 24, TA], 42),
    (35, "Trans Dark Cyan", [0, 181, 166, TA], 43),
    (36, "Trans Red", [204, 0, 0, TA], 44),
    (37, "Trans Purple", [255, 51, 153, TA], 45),
    (38, "Trans Brown", [102, 51, 0, TA], 32),
    (39, "Trans Light Gray", [153, 153, 153, TA], 40),
    (40, "Trans Gray", [102, 102, 88, TA], 32),
    (41, "Trans Light Cyan", [153, 192, 240, TA], 33),
    (42, "Trans Yellow Green", [204, 255, 0, TA], 34),
    (43, "Trans Cyan", [171, 253, 249, TA], 35),
    (44, "Trans Light Red", [255, 0, 0, TA], 36),
    (45, "Trans Pink", [255, 176, 204, TA], 37),
    (46, "Trans Yellow", [240, 196, 0, TA], 40),
    (47, "Clear", [255, 255, 255, TA], 40),
    (57, "Trans Orange", [255, 102, 0, TA], 40),
];

const RUBBER_SLOTS: &[u32] = &[256, 273, 324, 375, 511];

/// The color table plus named lookups and out-of-table custom colors
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<ColorInfo>,
    /// `!COLOUR` definitions with codes outside the table
    custom: Vec<(u32, ColorInfo)>,
    /// Lowercased name to color number
    names: FxHashMap<String, u32>,
}

impl Default for Palette {
    fn default() -> Self {
        let mut palette = Palette {
            colors: vec![ColorInfo::default(); 512],
            custom: Vec::new(),
            names: FxHashMap::default(),
        };
        palette.init_standard_colors();
        palette.init_mirrored_colors();
        palette.init_dithered_colors();
        palette.init_other_colors();
        palette
    }
}

impl Palette {
    fn init_standard_colors(&mut self) {
        for &(number, name, rgba, edge) in STANDARD_COLORS {
            self.colors[number as usize] = ColorInfo {
                name: name.to_owned(),
                rgba,
                edge_color_number: edge,
                ..ColorInfo::default()
            };
            self.names.insert(name.to_ascii_lowercase(), number);
        }
    }

    /// Undefined slots below 256 alias the classic color with the same
    /// low bits; bit 5 selects the transparent variant.
    fn init_mirrored_colors(&mut self) {
        for i in 0..256usize {
            if i == 16 || i == 24 || !self.colors[i].is_undefined() {
                continue;
            }
            let source = if i & 0x20 != 0 { i % 16 + 32 } else { i % 16 };
            self.colors[i] = self.colors[source].clone();
        }
    }

    /// Slots 256..=511 are the LDLite dither bank: each blends two
    /// classic colors.
    fn init_dithered_colors(&mut self) {
        for i in 256..512usize {
            let base = (i - 256) / 16;
            let dither = (i - 256) % 16;
            let blended = blend_colors(self.colors[base].rgba, self.colors[dither].rgba);
            self.colors[i] = ColorInfo {
                rgba: blended,
                edge_color_number: 0,
                ..ColorInfo::default()
            };
        }
    }

    /// A handful of dither-bank slots carry real colors and materials.
    fn init_other_colors(&mut self) {
        self.set_slot(382, "Tan", [204, 170, 102, 255]);
        // Scaled so the brightest gold component reflects at full
        // strength, doubled.
        let gold_scale = 255.0 / 240.0 * 2.0;
        let gold = self.set_slot(334, "Gold", [240, 176, 51, 255]);
        gold.specular = Some([
            240.0 / 255.0 * gold_scale,
            176.0 / 255.0 * gold_scale,
            51.0 / 255.0 * gold_scale,
            1.0,
        ]);
        gold.shininess = Some(5.0);
        gold.chrome = true;
        let chrome = self.set_slot(383, "Chrome", [204, 204, 204, 255]);
        chrome.specular = Some([0.9, 1.2, 1.5, 1.0]);
        chrome.shininess = Some(5.0);
        chrome.chrome = true;
        let contacts = self.set_slot(494, "Electrical Contacts", [204, 204, 204, 255]);
        contacts.specular = Some([0.9, 0.9, 1.5, 1.0]);
        contacts.shininess = Some(5.0);
        for &slot in RUBBER_SLOTS {
            let info = &mut self.colors[slot as usize];
            info.specular = Some([0.075, 0.075, 0.075, 1.0]);
            info.shininess = Some(15.0);
            info.rubber = true;
        }
        self.colors[256].edge_color_number = 8;
    }

    fn set_slot(&mut self, number: u32, name: &str, rgba: [u8; 4]) -> &mut ColorInfo {
        let key = name.to_ascii_lowercase();
        self.names.entry(key).or_insert(number);
        let info = &mut self.colors[number as usize];
        info.name = name.to_owned();
        info.rgba = rgba;
        info.edge_color_number = 0;
        info
    }

    /// Resolve any color number, including direct colors.
    pub fn color_info(&self, color_number: u32) -> ColorInfo {
        if (color_number as usize) < self.colors.len() {
            let info = &self.colors[color_number as usize];
            if info.is_undefined() {
                // Unmapped numbers render as the traditional loud orange.
                return ColorInfo {
                    rgba: [255, 128, 0, 255],
                    edge_color_number: 0,
                    ..ColorInfo::default()
                };
            }
            return info.clone();
        }
        for (number, info) in &self.custom {
            if *number == color_number {
                return info.clone();
            }
        }
        direct_color_info(color_number)
    }

    pub fn rgba(&self, color_number: u32) -> [u8; 4] {
        self.color_info(color_number).rgba
    }

    pub fn edge_color_number(&self, color_number: u32) -> u32 {
        self.color_info(color_number).edge_color_number
    }

    pub fn has_specular(&self, color_number: u32) -> bool {
        self.color_info(color_number).specular.is_some()
    }

    pub fn has_shininess(&self, color_number: u32) -> bool {
        self.color_info(color_number).shininess.is_some()
    }

    pub fn color_number_for_name(&self, name: &str) -> Option<u32> {
        let key = name.replace('_', " ").to_ascii_lowercase();
        self.names.get(&key).copied()
    }

    /// Closest color number for an RGB value: an exact classic-table
    /// match when one exists, a direct color otherwise.
    pub fn color_number_for_rgb(&self, r: u8, g: u8, b: u8, transparent: bool) -> u32 {
        for number in 0..=27u32 {
            if number == 16 || number == 24 {
                continue;
            }
            let rgba = self.colors[number as usize].rgba;
            if rgba[0] == r && rgba[1] == g && rgba[2] == b {
                return if transparent { number + 32 } else { number };
            }
        }
        let rgb = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        if transparent {
            0x3000000 | rgb
        } else {
            0x2000000 | rgb
        }
    }

    /// Direct color number encoding an exact RGBA value
    pub fn color_number_for_rgba(r: u8, g: u8, b: u8, a: u8) -> u32 {
        let rgb = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        if a == 255 {
            0x2000000 | rgb
        } else {
            0x3000000 | rgb
        }
    }

    /// Whether a comment line defines a color
    pub fn is_color_comment(&self, comment: &str) -> bool {
        has_prefix_ignore_case(comment, "0 !colour ")
            || has_prefix_ignore_case(comment, "0 color ")
    }

    /// Apply a color-definition comment to the palette. Returns false
    /// when the definition could not be parsed.
    pub fn parse_color_comment(&mut self, comment: &str) -> bool {
        if has_prefix_ignore_case(comment, "0 !colour ") {
            self.parse_ldraw_org_color(&comment["0 !colour ".len()..])
        } else if has_prefix_ignore_case(comment, "0 color ") {
            self.parse_ldlite_color(&comment["0 color ".len()..])
        } else {
            false
        }
    }

    /// `0 !COLOUR <name> CODE <n> VALUE #RRGGBB [EDGE e] [ALPHA a] ...`
    fn parse_ldraw_org_color(&mut self, rest: &str) -> bool {
        let mut words = rest.split(' ');
        let name = match words.next() {
            Some(w) if !w.is_empty() => w.replace('_', " "),
            _ => return false,
        };
        let mut info = ColorInfo {
            name,
            rgba: [0, 0, 0, 255],
            edge_color_number: 0,
            ..ColorInfo::default()
        };
        let mut code = None;
        while let Some(word) = words.next() {
            if word.eq_ignore_ascii_case("CODE") {
                code = words.next().and_then(|w| w.parse::<u32>().ok());
            } else if word.eq_ignore_ascii_case("VALUE") {
                match words.next().and_then(parse_hex_color) {
                    Some(rgb) => {
                        info.rgba[0] = (rgb >> 16) as u8;
                        info.rgba[1] = (rgb >> 8) as u8;
                        info.rgba[2] = rgb as u8;
                    }
                    None => return false,
                }
            } else if word.eq_ignore_ascii_case("EDGE") {
                match words.next() {
                    Some(w) => {
                        if let Some(rgb) = parse_hex_color(w) {
                            info.edge_color_number = (rgb & 0xFFFFFF) | 0x2000000;
                        } else if let Ok(number) = w.parse::<u32>() {
                            info.edge_color_number = number;
                        } else {
                            return false;
                        }
                    }
                    None => return false,
                }
            } else if word.eq_ignore_ascii_case("ALPHA") {
                match words.next().and_then(|w| w.parse::<u32>().ok()) {
                    Some(alpha) => info.rgba[3] = map_meta_alpha(alpha),
                    None => return false,
                }
            } else if word.eq_ignore_ascii_case("LUMINANCE") {
                info.luminance = words.next().and_then(|w| w.parse::<f32>().ok());
            } else if word.eq_ignore_ascii_case("CHROME") {
                info.chrome = true;
                info.specular = Some([0.9, 1.2, 1.5, 1.0]);
                info.shininess = Some(5.0);
            } else if word.eq_ignore_ascii_case("RUBBER") {
                info.rubber = true;
                info.specular = Some([0.075, 0.075, 0.075, 1.0]);
                info.shininess = Some(15.0);
            } else if word.eq_ignore_ascii_case("METAL") {
                info.specular = Some([0.9, 0.9, 1.5, 1.0]);
                info.shininess = Some(5.0);
            }
        }
        match code {
            Some(code) => {
                self.update_color(code, info);
                true
            }
            None => false,
        }
    }

    /// LDLite `0 COLOR`: ten integers, a main and a dither RGBA pair that
    /// get blended.
    fn parse_ldlite_color(&mut self, rest: &str) -> bool {
        let mut values = [0i32; 10];
        let mut words = rest.split(' ');
        for value in &mut values {
            match words.next().and_then(|w| w.parse::<i32>().ok()) {
                Some(v) => *value = v,
                None => return false,
            }
        }
        if values[0] < 0 {
            return false;
        }
        let main = [
            values[2] as u8,
            values[3] as u8,
            values[4] as u8,
            values[5] as u8,
        ];
        let dither = [
            values[6] as u8,
            values[7] as u8,
            values[8] as u8,
            values[9] as u8,
        ];
        let info = ColorInfo {
            rgba: blend_colors(main, dither),
            edge_color_number: values[1] as u32,
            ..ColorInfo::default()
        };
        self.update_color(values[0] as u32, info);
        true
    }

    fn update_color(&mut self, number: u32, info: ColorInfo) {
        if !info.name.is_empty() {
            self.names
                .insert(info.name.to_ascii_lowercase(), number);
        }
        if (number as usize) < self.colors.len() {
            self.colors[number as usize] = info;
        } else if let Some(slot) = self.custom.iter_mut().find(|(n, _)| *n == number) {
            slot.1 = info;
        } else {
            self.custom.push((number, info));
        }
    }
}

/// Decode a direct color number (0x2000000 and up).
fn direct_color_info(color_number: u32) -> ColorInfo {
    let kind = color_number >> 24;
    let value = color_number & 0xFFFFFF;
    let rgba = match kind {
        // 0x2RRGGBB: opaque RGB
        0x2 => [(value >> 16) as u8, (value >> 8) as u8, value as u8, 255],
        // 0x3RRGGBB: transparent RGB
        0x3 => [
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
            TRANSPARENT_ALPHA,
        ],
        // 0x4RGBRGB: two nibble colors averaged
        0x4 => {
            let hi = [(value >> 20) & 0xF, (value >> 16) & 0xF, (value >> 12) & 0xF];
            let lo = [(value >> 8) & 0xF, (value >> 4) & 0xF, value & 0xF];
            [
                ((hi[0] * 17 + lo[0] * 17) / 2) as u8,
                ((hi[1] * 17 + lo[1] * 17) / 2) as u8,
                ((hi[2] * 17 + lo[2] * 17) / 2) as u8,
                255,
            ]
        }
        // 0x5RGBxxx: opaque nibble color
        0x5 => [
            (((value >> 20) & 0xF) * 17) as u8,
            (((value >> 16) & 0xF) * 17) as u8,
            (((value >> 12) & 0xF) * 17) as u8,
            255,
        ],
        // 0x6xxxRGB: transparent nibble color
        0x6 => [
            (((value >> 8) & 0xF) * 17) as u8,
            (((value >> 4) & 0xF) * 17) as u8,
            ((value & 0xF) * 17) as u8,
            TRANSPARENT_ALPHA,
        ],
        // 0x7xxxxxx: invisible
        0x7 => [0, 0, 0, 0],
        _ => [255, 128, 0, 255],
    };
    ColorInfo {
        rgba,
        edge_color_number: 0,
        ..ColorInfo::default()
    }
}

/// Alpha-weighted per-channel blend of two colors
fn blend_colors(c1: [u8; 4], c2: [u8; 4]) -> [u8; 4] {
    if c1 == c2 {
        return c1;
    }
    let a1 = c1[3] as f32 / 255.0;
    let a2 = c2[3] as f32 / 255.0;
    let mut out = [0u8; 4];
    for i in 0..3 {
        if a1 + a2 > 0.0 {
            out[i] = ((c1[i] as f32 * a1 + c2[i] as f32 * a2) / (a1 + a2)) as u8;
        }
    }
    out[3] = ((c1[3] as u32 + c2[3] as u32) / 2) as u8;
    out
}

/// Map a `!COLOUR ALPHA` value onto the palette's transparency scale:
/// 128 lands exactly on the standard transparent alpha.
fn map_meta_alpha(alpha: u32) -> u8 {
    let ta = TRANSPARENT_ALPHA as u32;
    let mapped = if alpha == 128 {
        ta
    } else if alpha < 128 {
        alpha * ta / 128
    } else {
        ta + (alpha.min(255) - 128) * (255 - ta) / 127
    };
    mapped as u8
}

fn has_prefix_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn parse_hex_color(word: &str) -> Option<u32> {
    let digits = word
        .strip_prefix('#')
        .or_else(|| word.strip_prefix("0x"))
        .or_else(|| word.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}
