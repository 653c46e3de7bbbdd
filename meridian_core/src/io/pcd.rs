// meridian_core/src/io/pcd.rs

//! PCD v0.7 reading and writing.
//!
//! Reads `ascii` and `binary` data with `x y z` fields of type `F` and an
//! optional numeric `intensity`; any other field is skipped. Writes
//! little-endian `binary` with `F 4` fields. Non-finite points are kept as
//! they are; cleaning is the caller's job.

use crate::error::PcdError;
use crate::messages::{Point, PointCloud};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Data section layout used by [`write_pcd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcdEncoding {
    Ascii,
    #[default]
    Binary,
}

// =========================================================================
// == Header ==
// =========================================================================

#[derive(Debug, Clone)]
struct Field {
    name: String,
    size: usize,
    kind: char,
    count: usize,
}

#[derive(Debug)]
struct Header {
    fields: Vec<Field>,
    points: usize,
    data: String,
}

/// Where the fields we care about live within one point record.
struct Layout {
    /// Byte offset, or value index for ascii, of x/y/z/intensity.
    x: (usize, usize),
    y: (usize, usize),
    z: (usize, usize),
    intensity: Option<(usize, usize)>,
    /// (kind, size) per selected field, in x, y, z, intensity order.
    kinds: [(char, usize); 4],
    point_step: usize,
}

fn parse_header(text: &str) -> Result<Header, PcdError> {
    let mut names: Option<Vec<String>> = None;
    let mut sizes: Option<Vec<usize>> = None;
    let mut kinds: Option<Vec<char>> = None;
    let mut counts: Option<Vec<usize>> = None;
    let mut width: Option<usize> = None;
    let mut height: usize = 1;
    let mut points: Option<usize> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let Some(key) = tokens.next() else {
            continue;
        };
        let values: Vec<&str> = tokens.collect();
        match key.to_ascii_uppercase().as_str() {
            "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => names = Some(values.iter().map(|s| s.to_string()).collect()),
            "SIZE" => sizes = Some(parse_list(key, &values)?),
            "TYPE" => {
                kinds = Some(
                    values
                        .iter()
                        .map(|s| s.chars().next().unwrap_or('?').to_ascii_uppercase())
                        .collect(),
                )
            }
            "COUNT" => counts = Some(parse_list(key, &values)?),
            "WIDTH" => width = Some(parse_single(key, &values)?),
            "HEIGHT" => height = parse_single(key, &values)?,
            "POINTS" => points = Some(parse_single(key, &values)?),
            "DATA" => {
                let names = names.ok_or_else(|| PcdError::Header("missing FIELDS".into()))?;
                let sizes = sizes.ok_or_else(|| PcdError::Header("missing SIZE".into()))?;
                let kinds = kinds.ok_or_else(|| PcdError::Header("missing TYPE".into()))?;
                let counts = counts.unwrap_or_else(|| vec![1; names.len()]);
                if sizes.len() != names.len()
                    || kinds.len() != names.len()
                    || counts.len() != names.len()
                {
                    return Err(PcdError::Header(
                        "FIELDS, SIZE, TYPE and COUNT lengths differ".into(),
                    ));
                }
                let points = match (points, width) {
                    (Some(p), _) => p,
                    (None, Some(w)) => w
                        .checked_mul(height)
                        .ok_or_else(|| PcdError::Header("WIDTH * HEIGHT overflows".into()))?,
                    (None, None) => return Err(PcdError::Header("missing POINTS and WIDTH".into())),
                };
                let fields = names
                    .into_iter()
                    .zip(sizes)
                    .zip(kinds)
                    .zip(counts)
                    .map(|(((name, size), kind), count)| Field {
                        name,
                        size,
                        kind,
                        count,
                    })
                    .collect();
                let data = values
                    .first()
                    .ok_or_else(|| PcdError::Header("DATA without encoding".into()))?
                    .to_ascii_lowercase();
                return Ok(Header {
                    fields,
                    points,
                    data,
                });
            }
            other => return Err(PcdError::Header(format!("unknown header key `{other}`"))),
        }
    }
    Err(PcdError::Header("no DATA line".into()))
}

fn parse_list(key: &str, values: &[&str]) -> Result<Vec<usize>, PcdError> {
    values
        .iter()
        .map(|v| {
            v.parse()
                .map_err(|_| PcdError::Header(format!("bad {key} value `{v}`")))
        })
        .collect()
}

fn parse_single(key: &str, values: &[&str]) -> Result<usize, PcdError> {
    match values {
        [v] => v
            .parse()
            .map_err(|_| PcdError::Header(format!("bad {key} value `{v}`"))),
        _ => Err(PcdError::Header(format!("{key} expects one value"))),
    }
}

impl Layout {
    fn from_fields(fields: &[Field]) -> Result<Self, PcdError> {
        let mut byte_offset = 0;
        let mut value_index = 0;
        let mut found: [Option<(usize, usize, char, usize)>; 4] = [None; 4];

        for field in fields {
            let numeric = match field.kind {
                'F' => matches!(field.size, 4 | 8),
                'U' | 'I' => matches!(field.size, 1 | 2 | 4 | 8),
                _ => false,
            };
            let slot = match field.name.as_str() {
                "x" => Some(0),
                "y" => Some(1),
                "z" => Some(2),
                "intensity" | "i" => Some(3),
                _ => None,
            };
            if let Some(slot) = slot {
                let coordinate = slot < 3;
                if (coordinate && field.kind != 'F') || !numeric || field.count != 1 {
                    return Err(PcdError::UnsupportedField {
                        field: field.name.clone(),
                        kind: field.kind,
                        size: field.size,
                    });
                }
                found[slot] = Some((byte_offset, value_index, field.kind, field.size));
            }
            byte_offset = field
                .size
                .checked_mul(field.count)
                .and_then(|bytes| byte_offset.checked_add(bytes))
                .ok_or_else(|| PcdError::Header(format!("field `{}` is too large", field.name)))?;
            value_index += field.count;
        }

        let take = |slot: usize, name: &'static str| found[slot].ok_or(PcdError::MissingField(name));
        let (xb, xv, xk, xs) = take(0, "x")?;
        let (yb, yv, yk, ys) = take(1, "y")?;
        let (zb, zv, zk, zs) = take(2, "z")?;
        let intensity = found[3];
        let (ik, is) = intensity.map(|(_, _, k, s)| (k, s)).unwrap_or(('F', 4));

        Ok(Self {
            x: (xb, xv),
            y: (yb, yv),
            z: (zb, zv),
            intensity: intensity.map(|(b, v, _, _)| (b, v)),
            kinds: [(xk, xs), (yk, ys), (zk, zs), (ik, is)],
            point_step: byte_offset,
        })
    }
}

/// Decodes one little-endian scalar. The caller guarantees `bytes` is long enough.
fn decode(kind: char, size: usize, bytes: &[u8]) -> f64 {
    macro_rules! le {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(&bytes[..$n]);
            <$t>::from_le_bytes(buf) as f64
        }};
    }
    match (kind, size) {
        ('F', 4) => le!(f32, 4),
        ('F', 8) => le!(f64, 8),
        ('U', 1) => f64::from(bytes[0]),
        ('U', 2) => le!(u16, 2),
        ('U', 4) => le!(u32, 4),
        ('U', 8) => le!(u64, 8),
        ('I', 1) => f64::from(bytes[0] as i8),
        ('I', 2) => le!(i16, 2),
        ('I', 4) => le!(i32, 4),
        ('I', 8) => le!(i64, 8),
        _ => f64::NAN,
    }
}

// =========================================================================
// == Reading ==
// =========================================================================

pub fn read_pcd(path: impl AsRef<Path>) -> Result<PointCloud, PcdError> {
    let bytes = fs::read(path)?;
    parse_pcd(&bytes)
}

/// Parses a complete PCD file held in memory.
pub fn parse_pcd(bytes: &[u8]) -> Result<PointCloud, PcdError> {
    // The header is ASCII and ends with the line starting with DATA.
    let data_start = header_end(bytes)
        .ok_or_else(|| PcdError::Header("no DATA line".into()))?;
    let header_text = std::str::from_utf8(&bytes[..data_start])
        .map_err(|_| PcdError::Header("header is not valid UTF-8".into()))?;
    let header = parse_header(header_text)?;
    let layout = Layout::from_fields(&header.fields)?;
    let body = &bytes[data_start..];

    let points = match header.data.as_str() {
        "ascii" => read_ascii(body, &header, &layout)?,
        "binary" => read_binary(body, &header, &layout)?,
        other => return Err(PcdError::UnsupportedEncoding(other.to_string())),
    };
    Ok(PointCloud::new(0.0, points))
}

/// Byte index just past the newline of the `DATA ...` line.
fn header_end(bytes: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    while line_start < bytes.len() {
        let line_end = bytes[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| line_start + p + 1)
            .unwrap_or(bytes.len());
        let line = &bytes[line_start..line_end];
        if line.len() >= 4 && line[..4].eq_ignore_ascii_case(b"DATA") {
            return Some(line_end);
        }
        line_start = line_end;
    }
    None
}

fn read_ascii(body: &[u8], header: &Header, layout: &Layout) -> Result<Vec<Point>, PcdError> {
    let text = std::str::from_utf8(body).map_err(|_| PcdError::Data {
        index: 0,
        reason: "ascii data is not valid UTF-8".into(),
    })?;

    // POINTS is untrusted; every ascii point needs at least two bytes.
    let mut points = Vec::with_capacity(header.points.min(body.len() / 2));
    for (index, line) in text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(header.points)
        .enumerate()
    {
        let values: Vec<&str> = line.split_whitespace().collect();
        let value = |slot: usize| -> Result<f64, PcdError> {
            let token = values.get(slot).ok_or_else(|| PcdError::Data {
                index,
                reason: format!("expected more than {} values", values.len()),
            })?;
            token.parse::<f64>().map_err(|_| PcdError::Data {
                index,
                reason: format!("`{token}` is not a number"),
            })
        };
        let mut point = Point::new(value(layout.x.1)?, value(layout.y.1)?, value(layout.z.1)?);
        if let Some((_, slot)) = layout.intensity {
            point.intensity = Some(value(slot)? as f32);
        }
        points.push(point);
    }
    if points.len() < header.points {
        return Err(PcdError::Data {
            index: points.len(),
            reason: format!("file ends after {} of {} points", points.len(), header.points),
        });
    }
    Ok(points)
}

fn read_binary(body: &[u8], header: &Header, layout: &Layout) -> Result<Vec<Point>, PcdError> {
    let step = layout.point_step;
    if step == 0 {
        return Err(PcdError::Header("zero-sized point record".into()));
    }
    let available = body.len() / step;
    if available < header.points {
        return Err(PcdError::Data {
            index: available,
            reason: format!("binary data holds {available} of {} points", header.points),
        });
    }

    let [(xk, xs), (yk, ys), (zk, zs), (ik, is)] = layout.kinds;
    let points = body
        .chunks_exact(step)
        .take(header.points)
        .map(|record| {
            let mut point = Point::new(
                decode(xk, xs, &record[layout.x.0..]),
                decode(yk, ys, &record[layout.y.0..]),
                decode(zk, zs, &record[layout.z.0..]),
            );
            if let Some((offset, _)) = layout.intensity {
                point.intensity = Some(decode(ik, is, &record[offset..]) as f32);
            }
            point
        })
        .collect();
    Ok(points)
}

// =========================================================================
// == Writing ==
// =========================================================================

/// Writes `cloud` as PCD v0.7. Coordinates are stored as `f32`. The
/// `intensity` field is written only when at least one point carries one;
/// points without it are then written with intensity 0.
pub fn write_pcd(
    path: impl AsRef<Path>,
    cloud: &PointCloud,
    encoding: PcdEncoding,
) -> Result<(), PcdError> {
    let with_intensity = cloud.iter().any(|p| p.intensity.is_some());
    let n = cloud.len();
    let (fields, sizes, types, counts) = if with_intensity {
        ("x y z intensity", "4 4 4 4", "F F F F", "1 1 1 1")
    } else {
        ("x y z", "4 4 4", "F F F", "1 1 1")
    };
    let data = match encoding {
        PcdEncoding::Ascii => "ascii",
        PcdEncoding::Binary => "binary",
    };

    let mut out: Vec<u8> = Vec::with_capacity(256 + n * 16);
    write!(
        out,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS {fields}\n\
         SIZE {sizes}\n\
         TYPE {types}\n\
         COUNT {counts}\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA {data}\n"
    )?;

    for p in cloud.iter() {
        let xyz = [
            p.position.x as f32,
            p.position.y as f32,
            p.position.z as f32,
        ];
        let intensity = p.intensity.unwrap_or(0.0);
        match encoding {
            PcdEncoding::Ascii => {
                write!(out, "{} {} {}", xyz[0], xyz[1], xyz[2])?;
                if with_intensity {
                    write!(out, " {intensity}")?;
                }
                out.push(b'\n');
            }
            PcdEncoding::Binary => {
                for v in xyz {
                    out.extend_from_slice(&v.to_le_bytes());
                }
                if with_intensity {
                    out.extend_from_slice(&intensity.to_le_bytes());
                }
            }
        }
    }

    fs::write(path, out)?;
    Ok(())
}
