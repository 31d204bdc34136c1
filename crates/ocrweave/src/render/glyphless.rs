//! Synthesis of the glyphless TrueType font embedded in text layers.
//!
//! The text layer needs a font whose glyphs paint nothing but still carry
//! advance widths, so text selection and copy-paste work while nothing
//! appears on screen. Rather than shipping a binary font, the sfnt is built
//! here: two empty glyphs (`.notdef` and a blank), minimal required tables,
//! correct checksums. Width-awareness lives in the PDF `/W` array and the
//! renderer's advance computation, not in the font program.

use once_cell::sync::Lazy;

/// Font units per em.
pub const UNITS_PER_EM: u16 = 1000;
pub const ASCENT: i16 = 800;
pub const DESCENT: i16 = -200;
/// Advance width of the blank glyph, font units.
pub const DEFAULT_WIDTH: u16 = 500;

/// PostScript/BaseFont name of the synthesized font.
pub const FONT_NAME: &str = "GlyphLessFont";

static FONT_PROGRAM: Lazy<Vec<u8>> = Lazy::new(build_font);

/// The complete TrueType font program.
pub fn font_program() -> &'static [u8] {
    &FONT_PROGRAM
}

/// Advance width of one character in font units.
///
/// Combining marks and invisible formatting characters advance nothing; East
/// Asian wide and fullwidth characters advance a full em; everything else a
/// half em.
pub fn char_width_units(c: char) -> u16 {
    let cp = c as u32;
    if is_zero_width(cp) {
        0
    } else if is_wide(cp) {
        1000
    } else {
        500
    }
}

fn is_zero_width(cp: u32) -> bool {
    matches!(cp,
        // Combining diacritical marks and friends.
        0x0300..=0x036F
        | 0x0483..=0x0489
        | 0x0591..=0x05BD
        | 0x0610..=0x061A
        | 0x064B..=0x065F
        | 0x0E31 | 0x0E34..=0x0E3A | 0x0E47..=0x0E4E
        | 0x1AB0..=0x1AFF
        | 0x1DC0..=0x1DFF
        | 0x20D0..=0x20FF
        | 0xFE00..=0xFE0F
        | 0xFE20..=0xFE2F
        // Invisible formatting characters.
        | 0x200B..=0x200F
        | 0x202A..=0x202E
        | 0x2060..=0x2064
        | 0xFEFF
    )
}

fn is_wide(cp: u32) -> bool {
    matches!(cp,
        0x1100..=0x115F           // Hangul jamo
        | 0x2E80..=0x303E         // CJK radicals, kana punctuation
        | 0x3041..=0x33FF         // Hiragana through CJK compatibility
        | 0x3400..=0x4DBF         // CJK extension A
        | 0x4E00..=0x9FFF         // CJK unified ideographs
        | 0xA000..=0xA4CF         // Yi
        | 0xAC00..=0xD7A3         // Hangul syllables
        | 0xF900..=0xFAFF         // CJK compatibility ideographs
        | 0xFE30..=0xFE4F         // CJK compatibility forms
        | 0xFF00..=0xFF60         // Fullwidth forms
        | 0xFFE0..=0xFFE6
    )
}

struct Table {
    tag: [u8; 4],
    data: Vec<u8>,
}

fn build_font() -> Vec<u8> {
    // Table order in the file follows the alphabetical tag order of the
    // directory, which is also the recommended physical order.
    let mut tables = vec![
        Table {
            tag: *b"cmap",
            data: cmap_table(),
        },
        Table {
            tag: *b"glyf",
            data: vec![0u8; 4],
        },
        Table {
            tag: *b"head",
            data: head_table(0),
        },
        Table {
            tag: *b"hhea",
            data: hhea_table(),
        },
        Table {
            tag: *b"hmtx",
            data: hmtx_table(),
        },
        Table {
            tag: *b"loca",
            data: loca_table(),
        },
        Table {
            tag: *b"maxp",
            data: maxp_table(),
        },
        Table {
            tag: *b"name",
            data: name_table(),
        },
        Table {
            tag: *b"post",
            data: post_table(),
        },
    ];
    tables.sort_by_key(|t| t.tag);

    let font = assemble(&tables);

    // Fix up head.checkSumAdjustment so the whole-file checksum comes out to
    // the magic constant.
    let whole = table_checksum(&font);
    let adjustment = 0xB1B0AFBAu32.wrapping_sub(whole);
    let head_offset = table_offset(&font, b"head").expect("head table present");
    let mut font = font;
    font[head_offset + 8..head_offset + 12].copy_from_slice(&adjustment.to_be_bytes());
    font
}

fn assemble(tables: &[Table]) -> Vec<u8> {
    let num_tables = tables.len() as u16;
    let entry_selector = 15 - num_tables.leading_zeros() as u16; // floor(log2 n)
    let search_range = 16 * (1 << entry_selector);
    let range_shift = num_tables * 16 - search_range;

    let mut font = Vec::new();
    font.extend_from_slice(&0x00010000u32.to_be_bytes()); // sfnt version
    font.extend_from_slice(&num_tables.to_be_bytes());
    font.extend_from_slice(&search_range.to_be_bytes());
    font.extend_from_slice(&entry_selector.to_be_bytes());
    font.extend_from_slice(&range_shift.to_be_bytes());

    let directory_size = 12 + 16 * tables.len();
    let mut offset = directory_size;
    for table in tables {
        font.extend_from_slice(&table.tag);
        font.extend_from_slice(&table_checksum(&table.data).to_be_bytes());
        font.extend_from_slice(&(offset as u32).to_be_bytes());
        font.extend_from_slice(&(table.data.len() as u32).to_be_bytes());
        offset += padded_len(table.data.len());
    }
    for table in tables {
        font.extend_from_slice(&table.data);
        font.resize(font.len() + padded_len(table.data.len()) - table.data.len(), 0);
    }
    font
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn table_checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}

fn table_offset(font: &[u8], tag: &[u8; 4]) -> Option<usize> {
    let num_tables = u16::from_be_bytes([font[4], font[5]]) as usize;
    for n in 0..num_tables {
        let entry = 12 + n * 16;
        if &font[entry..entry + 4] == tag {
            let offset = u32::from_be_bytes([
                font[entry + 8],
                font[entry + 9],
                font[entry + 10],
                font[entry + 11],
            ]);
            return Some(offset as usize);
        }
    }
    None
}

fn head_table(checksum_adjustment: u32) -> Vec<u8> {
    let mut t = Vec::with_capacity(54);
    t.extend_from_slice(&0x00010000u32.to_be_bytes()); // version
    t.extend_from_slice(&0x00010000u32.to_be_bytes()); // fontRevision
    t.extend_from_slice(&checksum_adjustment.to_be_bytes());
    t.extend_from_slice(&0x5F0F3CF5u32.to_be_bytes()); // magicNumber
    t.extend_from_slice(&3u16.to_be_bytes()); // flags: baseline + lsb at 0
    t.extend_from_slice(&UNITS_PER_EM.to_be_bytes());
    t.extend_from_slice(&0i64.to_be_bytes()); // created
    t.extend_from_slice(&0i64.to_be_bytes()); // modified
    t.extend_from_slice(&0i16.to_be_bytes()); // xMin
    t.extend_from_slice(&0i16.to_be_bytes()); // yMin
    t.extend_from_slice(&0i16.to_be_bytes()); // xMax
    t.extend_from_slice(&0i16.to_be_bytes()); // yMax
    t.extend_from_slice(&0u16.to_be_bytes()); // macStyle
    t.extend_from_slice(&6u16.to_be_bytes()); // lowestRecPPEM
    t.extend_from_slice(&2i16.to_be_bytes()); // fontDirectionHint
    t.extend_from_slice(&0i16.to_be_bytes()); // indexToLocFormat: short
    t.extend_from_slice(&0i16.to_be_bytes()); // glyphDataFormat
    t
}

fn hhea_table() -> Vec<u8> {
    let mut t = Vec::with_capacity(36);
    t.extend_from_slice(&0x00010000u32.to_be_bytes());
    t.extend_from_slice(&ASCENT.to_be_bytes());
    t.extend_from_slice(&DESCENT.to_be_bytes());
    t.extend_from_slice(&0i16.to_be_bytes()); // lineGap
    t.extend_from_slice(&DEFAULT_WIDTH.to_be_bytes()); // advanceWidthMax
    t.extend_from_slice(&0i16.to_be_bytes()); // minLeftSideBearing
    t.extend_from_slice(&0i16.to_be_bytes()); // minRightSideBearing
    t.extend_from_slice(&0i16.to_be_bytes()); // xMaxExtent
    t.extend_from_slice(&1i16.to_be_bytes()); // caretSlopeRise
    t.extend_from_slice(&0i16.to_be_bytes()); // caretSlopeRun
    t.extend_from_slice(&0i16.to_be_bytes()); // caretOffset
    t.extend_from_slice(&[0u8; 8]); // reserved
    t.extend_from_slice(&0i16.to_be_bytes()); // metricDataFormat
    t.extend_from_slice(&2u16.to_be_bytes()); // numberOfHMetrics
    t
}

fn maxp_table() -> Vec<u8> {
    let mut t = Vec::with_capacity(32);
    t.extend_from_slice(&0x00010000u32.to_be_bytes());
    t.extend_from_slice(&2u16.to_be_bytes()); // numGlyphs
    t.extend_from_slice(&0u16.to_be_bytes()); // maxPoints
    t.extend_from_slice(&0u16.to_be_bytes()); // maxContours
    t.extend_from_slice(&0u16.to_be_bytes()); // maxCompositePoints
    t.extend_from_slice(&0u16.to_be_bytes()); // maxCompositeContours
    t.extend_from_slice(&2u16.to_be_bytes()); // maxZones
    t.extend_from_slice(&0u16.to_be_bytes()); // maxTwilightPoints
    t.extend_from_slice(&0u16.to_be_bytes()); // maxStorage
    t.extend_from_slice(&0u16.to_be_bytes()); // maxFunctionDefs
    t.extend_from_slice(&0u16.to_be_bytes()); // maxInstructionDefs
    t.extend_from_slice(&0u16.to_be_bytes()); // maxStackElements
    t.extend_from_slice(&0u16.to_be_bytes()); // maxSizeOfInstructions
    t.extend_from_slice(&0u16.to_be_bytes()); // maxComponentElements
    t.extend_from_slice(&0u16.to_be_bytes()); // maxComponentDepth
    t
}

fn hmtx_table() -> Vec<u8> {
    let mut t = Vec::with_capacity(8);
    for _ in 0..2 {
        t.extend_from_slice(&DEFAULT_WIDTH.to_be_bytes());
        t.extend_from_slice(&0i16.to_be_bytes()); // lsb
    }
    t
}

fn loca_table() -> Vec<u8> {
    // Short format, numGlyphs + 1 entries, all zero: both glyphs are empty.
    vec![0u8; 6]
}

/// Format 4 cmap mapping U+0020 to the blank glyph.
///
/// CID text does not consult this table (the `/CIDToGIDMap` does the work),
/// but a structurally valid cmap keeps font sanity checkers happy.
fn cmap_table() -> Vec<u8> {
    let mut sub = Vec::new();
    sub.extend_from_slice(&4u16.to_be_bytes()); // format
    sub.extend_from_slice(&32u16.to_be_bytes()); // length
    sub.extend_from_slice(&0u16.to_be_bytes()); // language
    sub.extend_from_slice(&4u16.to_be_bytes()); // segCountX2
    sub.extend_from_slice(&4u16.to_be_bytes()); // searchRange
    sub.extend_from_slice(&1u16.to_be_bytes()); // entrySelector
    sub.extend_from_slice(&0u16.to_be_bytes()); // rangeShift
    sub.extend_from_slice(&0x0020u16.to_be_bytes()); // endCode[0]
    sub.extend_from_slice(&0xFFFFu16.to_be_bytes()); // endCode[1]
    sub.extend_from_slice(&0u16.to_be_bytes()); // reservedPad
    sub.extend_from_slice(&0x0020u16.to_be_bytes()); // startCode[0]
    sub.extend_from_slice(&0xFFFFu16.to_be_bytes()); // startCode[1]
    sub.extend_from_slice(&0xFFE1u16.to_be_bytes()); // idDelta[0]: 0x20 -> 1
    sub.extend_from_slice(&1u16.to_be_bytes()); // idDelta[1]: 0xFFFF -> 0
    sub.extend_from_slice(&0u16.to_be_bytes()); // idRangeOffset[0]
    sub.extend_from_slice(&0u16.to_be_bytes()); // idRangeOffset[1]

    let mut t = Vec::new();
    t.extend_from_slice(&0u16.to_be_bytes()); // version
    t.extend_from_slice(&1u16.to_be_bytes()); // numTables
    t.extend_from_slice(&3u16.to_be_bytes()); // platform: Windows
    t.extend_from_slice(&1u16.to_be_bytes()); // encoding: Unicode BMP
    t.extend_from_slice(&12u32.to_be_bytes()); // subtable offset
    t.extend_from_slice(&sub);
    t
}

fn name_table() -> Vec<u8> {
    // (nameID, value) records, Windows platform, UTF-16BE.
    let records: &[(u16, &str)] = &[
        (1, FONT_NAME),
        (2, "Regular"),
        (4, FONT_NAME),
        (6, FONT_NAME),
    ];

    let mut string_data: Vec<u8> = Vec::new();
    let mut entries = Vec::new();
    for (name_id, value) in records {
        let encoded: Vec<u8> = value
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect();
        entries.push((*name_id, string_data.len() as u16, encoded.len() as u16));
        string_data.extend_from_slice(&encoded);
    }

    let mut t = Vec::new();
    t.extend_from_slice(&0u16.to_be_bytes()); // format
    t.extend_from_slice(&(records.len() as u16).to_be_bytes());
    let string_offset = 6 + 12 * records.len() as u16;
    t.extend_from_slice(&string_offset.to_be_bytes());
    for (name_id, offset, length) in entries {
        t.extend_from_slice(&3u16.to_be_bytes()); // platform: Windows
        t.extend_from_slice(&1u16.to_be_bytes()); // encoding: Unicode BMP
        t.extend_from_slice(&0x0409u16.to_be_bytes()); // language: en-US
        t.extend_from_slice(&name_id.to_be_bytes());
        t.extend_from_slice(&length.to_be_bytes());
        t.extend_from_slice(&offset.to_be_bytes());
    }
    t.extend_from_slice(&string_data);
    t
}

fn post_table() -> Vec<u8> {
    let mut t = Vec::with_capacity(32);
    t.extend_from_slice(&0x00030000u32.to_be_bytes()); // version 3: no names
    t.extend_from_slice(&0i32.to_be_bytes()); // italicAngle
    t.extend_from_slice(&(-100i16).to_be_bytes()); // underlinePosition
    t.extend_from_slice(&50i16.to_be_bytes()); // underlineThickness
    t.extend_from_slice(&0u32.to_be_bytes()); // isFixedPitch
    t.extend_from_slice(&[0u8; 16]); // memory hints
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_magic_and_table_count() {
        let font = font_program();
        assert_eq!(&font[0..4], &0x00010000u32.to_be_bytes());
        let num_tables = u16::from_be_bytes([font[4], font[5]]);
        assert_eq!(num_tables, 9);
    }

    #[test]
    fn test_whole_font_checksum() {
        let font = font_program();
        // With checkSumAdjustment applied, the whole file sums to the magic
        // constant.
        assert_eq!(table_checksum(font), 0xB1B0AFBA);
    }

    #[test]
    fn test_required_tables_present_and_ordered() {
        let font = font_program();
        let mut tags = Vec::new();
        let num_tables = u16::from_be_bytes([font[4], font[5]]) as usize;
        for n in 0..num_tables {
            let entry = 12 + n * 16;
            tags.push(font[entry..entry + 4].to_vec());
        }
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted, "table directory must be sorted by tag");
        for required in [b"cmap", b"glyf", b"head", b"hhea", b"hmtx", b"loca", b"maxp"] {
            assert!(
                tags.iter().any(|t| t == required),
                "missing table {:?}",
                String::from_utf8_lossy(required)
            );
        }
    }

    #[test]
    fn test_head_table_magic() {
        let font = font_program();
        let head = table_offset(font, b"head").unwrap();
        assert_eq!(&font[head + 12..head + 16], &0x5F0F3CF5u32.to_be_bytes());
    }

    #[test]
    fn test_table_offsets_in_bounds_and_aligned() {
        let font = font_program();
        let num_tables = u16::from_be_bytes([font[4], font[5]]) as usize;
        for n in 0..num_tables {
            let entry = 12 + n * 16;
            let offset = u32::from_be_bytes(font[entry + 8..entry + 12].try_into().unwrap());
            let length = u32::from_be_bytes(font[entry + 12..entry + 16].try_into().unwrap());
            assert_eq!(offset % 4, 0);
            assert!((offset + length) as usize <= font.len());
        }
    }

    #[test]
    fn test_char_widths() {
        assert_eq!(char_width_units('a'), 500);
        assert_eq!(char_width_units(' '), 500);
        assert_eq!(char_width_units('\u{0301}'), 0); // combining acute
        assert_eq!(char_width_units('\u{200D}'), 0); // zero width joiner
        assert_eq!(char_width_units('\u{4E2D}'), 1000); // CJK ideograph
        assert_eq!(char_width_units('\u{AC00}'), 1000); // Hangul syllable
        assert_eq!(char_width_units('\u{FF21}'), 1000); // fullwidth A
    }

    #[test]
    fn test_head_table_builder_unused_adjustment() {
        // The adjustment passed to head_table is a placeholder; assemble()
        // patches the real one in.
        let head = head_table(0);
        assert_eq!(head.len(), 54);
        assert_eq!(&head[8..12], &[0, 0, 0, 0]);
    }
}
