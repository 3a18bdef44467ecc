// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Legacy VTK reader and writer
//!
//! Handles `POLYDATA` and `UNSTRUCTURED_GRID` datasets in the 3.0 layout,
//! ASCII or big-endian BINARY. Arrays are written as `FIELD` data; the
//! reader also accepts `SCALARS`, `VECTORS` and `NORMALS` sections.

use crate::error::Result;
use crate::geometry::{ArrayValues, Cell, CellType, DataArray, SurfaceMesh, VolumeMesh};
use anyhow::{anyhow, bail, Context};
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// On-disk encoding of the data sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VtkEncoding {
    #[default]
    Ascii,
    Binary,
}

/// A dataset read from a legacy file
#[derive(Debug, Clone, PartialEq)]
pub enum VtkDataset {
    PolyData(SurfaceMesh),
    UnstructuredGrid(VolumeMesh),
}

pub fn write_polydata(mesh: &SurfaceMesh, path: &Path, encoding: VtkEncoding) -> Result<()> {
    write_bytes(path, &encode_polydata(mesh, encoding)?)
}

pub fn write_unstructured_grid(mesh: &VolumeMesh, path: &Path, encoding: VtkEncoding) -> Result<()> {
    write_bytes(path, &encode_unstructured_grid(mesh, encoding)?)
}

pub fn read_dataset(path: &Path) -> Result<VtkDataset> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read VTK file: {:?}", path))?;
    let dataset = decode(&bytes).with_context(|| format!("Failed to parse VTK file: {:?}", path))?;
    Ok(dataset)
}

pub fn read_polydata(path: &Path) -> Result<SurfaceMesh> {
    match read_dataset(path)? {
        VtkDataset::PolyData(mesh) => Ok(mesh),
        VtkDataset::UnstructuredGrid(_) => Err(anyhow!("{:?} holds an unstructured grid, not polydata", path).into()),
    }
}

pub fn read_unstructured_grid(path: &Path) -> Result<VolumeMesh> {
    match read_dataset(path)? {
        VtkDataset::UnstructuredGrid(mesh) => Ok(mesh),
        VtkDataset::PolyData(_) => Err(anyhow!("{:?} holds polydata, not an unstructured grid", path).into()),
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create VTK file: {:?}", path))?;
    let mut out = BufWriter::new(file);
    out.write_all(bytes)?;
    out.flush()?;
    debug!("wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

/// Serialize a surface. Polylines precede triangles in cell order, so cell
/// arrays are padded with zeros for them.
pub fn encode_polydata(mesh: &SurfaceMesh, encoding: VtkEncoding) -> Result<Vec<u8>> {
    let mut w = Writer::new(encoding);
    w.header("POLYDATA");
    w.points(&mesh.points);
    if !mesh.lines.is_empty() {
        w.cells("LINES", mesh.lines.iter().map(|l| l.as_slice()));
    }
    if !mesh.triangles.is_empty() {
        w.cells("POLYGONS", mesh.triangles.iter().map(|t| t.as_slice()));
    }

    w.arrays("POINT_DATA", mesh.points.len(), &mesh.point_data, 0);
    let padded = mesh.lines.len();
    w.arrays("CELL_DATA", padded + mesh.triangles.len(), &mesh.cell_data, padded);
    Ok(w.finish())
}

pub fn encode_unstructured_grid(mesh: &VolumeMesh, encoding: VtkEncoding) -> Result<Vec<u8>> {
    let mut w = Writer::new(encoding);
    w.header("UNSTRUCTURED_GRID");
    w.points(&mesh.points);
    w.cells("CELLS", mesh.cells.iter().map(|c| c.points.as_slice()));
    w.line(&format!("CELL_TYPES {}", mesh.cells.len()));
    let types: Vec<i32> = mesh.cells.iter().map(|c| c.kind.vtk_id()).collect();
    w.ints(&types, 1);
    w.arrays("POINT_DATA", mesh.points.len(), &mesh.point_data, 0);
    w.arrays("CELL_DATA", mesh.cells.len(), &mesh.cell_data, 0);
    Ok(w.finish())
}

struct Writer {
    out: Vec<u8>,
    binary: bool,
}

impl Writer {
    fn new(encoding: VtkEncoding) -> Self {
        Self {
            out: Vec::new(),
            binary: encoding == VtkEncoding::Binary,
        }
    }

    fn line(&mut self, text: &str) {
        self.out.extend_from_slice(text.as_bytes());
        self.out.push(b'\n');
    }

    fn header(&mut self, dataset: &str) {
        self.line("# vtk DataFile Version 3.0");
        self.line("solidmesh");
        self.line(if self.binary { "BINARY" } else { "ASCII" });
        self.line(&format!("DATASET {}", dataset));
    }

    fn points(&mut self, points: &[Point3<f64>]) {
        self.line(&format!("POINTS {} double", points.len()));
        let coords: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
        self.doubles(&coords, 3);
    }

    fn cells<'a>(&mut self, keyword: &str, cells: impl Iterator<Item = &'a [usize]> + Clone) {
        let count = cells.clone().count();
        let size: usize = cells.clone().map(|c| c.len() + 1).sum();
        self.line(&format!("{} {} {}", keyword, count, size));
        if self.binary {
            for cell in cells {
                self.out.extend_from_slice(&(cell.len() as i32).to_be_bytes());
                for &v in cell {
                    self.out.extend_from_slice(&(v as i32).to_be_bytes());
                }
            }
            self.out.push(b'\n');
        } else {
            for cell in cells {
                let mut text = cell.len().to_string();
                for v in cell {
                    text.push(' ');
                    text.push_str(&v.to_string());
                }
                self.line(&text);
            }
        }
    }

    fn doubles(&mut self, values: &[f64], per_line: usize) {
        if self.binary {
            for v in values {
                self.out.extend_from_slice(&v.to_be_bytes());
            }
            self.out.push(b'\n');
        } else {
            for chunk in values.chunks(per_line.max(1)) {
                let text: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
                self.line(&text.join(" "));
            }
        }
    }

    fn ints(&mut self, values: &[i32], per_line: usize) {
        if self.binary {
            for v in values {
                self.out.extend_from_slice(&v.to_be_bytes());
            }
            self.out.push(b'\n');
        } else {
            for chunk in values.chunks(per_line.max(1)) {
                let text: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
                self.line(&text.join(" "));
            }
        }
    }

    /// Write a `FIELD` block. `padding` leading zero tuples are inserted
    /// before each array's values.
    fn arrays(&mut self, section: &str, count: usize, arrays: &[DataArray], padding: usize) {
        let valid: Vec<&DataArray> = arrays
            .iter()
            .filter(|a| {
                let ok = a.len() + padding == count;
                if !ok {
                    warn!("skipping {} array '{}': {} tuples for {} entities", section, a.name, a.len(), count);
                }
                ok
            })
            .collect();
        if valid.is_empty() {
            return;
        }
        self.line(&format!("{} {}", section, count));
        self.line(&format!("FIELD FieldData {}", valid.len()));
        for array in valid {
            let name = array.name.replace(' ', "%20");
            let pad = padding * array.components;
            match &array.values {
                ArrayValues::Float64(values) => {
                    self.line(&format!("{} {} {} double", name, array.components, count));
                    let mut all = vec![0.0; pad];
                    all.extend_from_slice(values);
                    self.doubles(&all, array.components);
                }
                ArrayValues::Int32(values) => {
                    self.line(&format!("{} {} {} int", name, array.components, count));
                    let mut all = vec![0; pad];
                    all.extend_from_slice(values);
                    self.ints(&all, array.components);
                }
            }
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueType {
    F32,
    F64,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
}

impl ValueType {
    fn parse(name: &str) -> anyhow::Result<Self> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "float" => ValueType::F32,
            "double" => ValueType::F64,
            "char" => ValueType::I8,
            "unsigned_char" | "bit" => ValueType::U8,
            "short" => ValueType::I16,
            "unsigned_short" => ValueType::U16,
            "int" | "vtkidtype" => ValueType::I32,
            "unsigned_int" => ValueType::U32,
            "long" | "vtktypeint64" => ValueType::I64,
            "unsigned_long" | "vtktypeuint64" => ValueType::U64,
            other => bail!("unsupported data type '{}'", other),
        })
    }

    fn size(self) -> usize {
        match self {
            ValueType::I8 | ValueType::U8 => 1,
            ValueType::I16 | ValueType::U16 => 2,
            ValueType::F32 | ValueType::I32 | ValueType::U32 => 4,
            ValueType::F64 | ValueType::I64 | ValueType::U64 => 8,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }
}

enum Numbers {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    binary: bool,
}

impl<'a> Cursor<'a> {
    fn line(&mut self) -> Option<String> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
        self.pos += (end + 1).min(rest.len());
        Some(String::from_utf8_lossy(&rest[..end]).trim_end_matches('\r').to_string())
    }

    /// Whitespace-separated tokens of the next non-blank line
    fn keyword_line(&mut self) -> Option<Vec<String>> {
        while let Some(line) = self.line() {
            let tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if !tokens.is_empty() {
                return Some(tokens);
            }
        }
        None
    }

    fn token(&mut self) -> anyhow::Result<&'a str> {
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let start = self.pos;
        while self.pos < self.data.len() && !self.data[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if start == self.pos {
            bail!("unexpected end of file");
        }
        std::str::from_utf8(&self.data[start..self.pos]).context("non-UTF-8 token")
    }

    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            bail!("binary block truncated: need {} bytes at offset {}", len, self.pos);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn numbers(&mut self, count: usize, ty: ValueType) -> anyhow::Result<Numbers> {
        if !self.binary {
            return if ty.is_float() {
                (0..count)
                    .map(|_| {
                        let t = self.token()?;
                        t.parse::<f64>().with_context(|| format!("invalid number '{}'", t))
                    })
                    .collect::<anyhow::Result<_>>()
                    .map(Numbers::Float)
            } else {
                (0..count)
                    .map(|_| {
                        let t = self.token()?;
                        t.parse::<i64>().with_context(|| format!("invalid integer '{}'", t))
                    })
                    .collect::<anyhow::Result<_>>()
                    .map(Numbers::Int)
            };
        }

        let bytes = self.take(count * ty.size())?;
        let chunks = bytes.chunks_exact(ty.size());
        Ok(match ty {
            ValueType::F32 => Numbers::Float(
                chunks
                    .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f64)
                    .collect(),
            ),
            ValueType::F64 => Numbers::Float(
                chunks
                    .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            ValueType::I8 => Numbers::Int(chunks.map(|c| c[0] as i8 as i64).collect()),
            ValueType::U8 => Numbers::Int(chunks.map(|c| c[0] as i64).collect()),
            ValueType::I16 => Numbers::Int(chunks.map(|c| i16::from_be_bytes([c[0], c[1]]) as i64).collect()),
            ValueType::U16 => Numbers::Int(chunks.map(|c| u16::from_be_bytes([c[0], c[1]]) as i64).collect()),
            ValueType::I32 => Numbers::Int(
                chunks
                    .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            ValueType::U32 => Numbers::Int(
                chunks
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            ValueType::I64 | ValueType::U64 => Numbers::Int(
                chunks
                    .map(|c| i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        })
    }

    fn floats(&mut self, count: usize, ty: ValueType) -> anyhow::Result<Vec<f64>> {
        Ok(match self.numbers(count, ty)? {
            Numbers::Float(v) => v,
            Numbers::Int(v) => v.into_iter().map(|x| x as f64).collect(),
        })
    }

    /// Connectivity lists: `count` cells stored as `n id0 .. idn-1`
    fn cell_list(&mut self, count: usize, size: usize, point_count: usize) -> anyhow::Result<Vec<Vec<usize>>> {
        let raw = match self.numbers(size, ValueType::I32)? {
            Numbers::Int(v) => v,
            Numbers::Float(_) => unreachable!("integer type requested"),
        };
        let mut cells = Vec::with_capacity(count);
        let mut i = 0;
        for _ in 0..count {
            let n = *raw.get(i).ok_or_else(|| anyhow!("cell list shorter than declared"))? as usize;
            let ids = raw
                .get(i + 1..i + 1 + n)
                .ok_or_else(|| anyhow!("cell list shorter than declared"))?;
            let cell = ids
                .iter()
                .map(|&id| {
                    if id < 0 || id as usize >= point_count {
                        bail!("point index {} out of range", id);
                    }
                    Ok(id as usize)
                })
                .collect::<anyhow::Result<Vec<usize>>>()?;
            cells.push(cell);
            i += n + 1;
        }
        Ok(cells)
    }

    /// Skip a VTK 5 `METADATA` block, which ends at a blank line
    fn skip_metadata(&mut self) {
        while let Some(line) = self.line() {
            if line.trim().is_empty() {
                break;
            }
        }
    }
}

fn to_array(name: &str, components: usize, numbers: Numbers) -> anyhow::Result<DataArray> {
    let name = name.replace("%20", " ");
    Ok(match numbers {
        Numbers::Float(values) => DataArray::vectors_f64(name, components, values),
        Numbers::Int(values) => {
            let values = values
                .into_iter()
                .map(|v| i32::try_from(v).with_context(|| format!("value {} of '{}' exceeds int range", v, name)))
                .collect::<anyhow::Result<Vec<i32>>>()?;
            DataArray {
                name,
                components: components.max(1),
                values: ArrayValues::Int32(values),
            }
        }
    })
}

#[derive(Default)]
struct Parsed {
    points: Vec<Point3<f64>>,
    verts: usize,
    lines: Vec<Vec<usize>>,
    polygons: Vec<Vec<usize>>,
    cells: Vec<Vec<usize>>,
    cell_types: Vec<i64>,
    point_data: Vec<DataArray>,
    cell_data: Vec<DataArray>,
}

fn parse_sections(cursor: &mut Cursor<'_>) -> anyhow::Result<Parsed> {
    let mut parsed = Parsed::default();
    let mut section: Option<(bool, usize)> = None;

    while let Some(tokens) = cursor.keyword_line() {
        let keyword = tokens[0].to_ascii_uppercase();
        let arg = |i: usize| -> anyhow::Result<usize> {
            tokens
                .get(i)
                .ok_or_else(|| anyhow!("{} is missing argument {}", keyword, i))?
                .parse::<usize>()
                .with_context(|| format!("invalid count in {}", keyword))
        };
        match keyword.as_str() {
            "POINTS" => {
                let n = arg(1)?;
                let ty = ValueType::parse(tokens.get(2).map(String::as_str).unwrap_or("float"))?;
                let coords = cursor.floats(n * 3, ty)?;
                parsed.points = coords.chunks_exact(3).map(|c| Point3::new(c[0], c[1], c[2])).collect();
            }
            "VERTICES" => {
                parsed.verts = arg(1)?;
                cursor.cell_list(parsed.verts, arg(2)?, parsed.points.len())?;
            }
            "LINES" => parsed.lines = cursor.cell_list(arg(1)?, arg(2)?, parsed.points.len())?,
            "POLYGONS" => parsed.polygons = cursor.cell_list(arg(1)?, arg(2)?, parsed.points.len())?,
            "CELLS" => parsed.cells = cursor.cell_list(arg(1)?, arg(2)?, parsed.points.len())?,
            "CELL_TYPES" => {
                parsed.cell_types = match cursor.numbers(arg(1)?, ValueType::I32)? {
                    Numbers::Int(v) => v,
                    Numbers::Float(_) => unreachable!("integer type requested"),
                }
            }
            "TRIANGLE_STRIPS" => bail!("triangle strips are not supported"),
            "POINT_DATA" => section = Some((true, arg(1)?)),
            "CELL_DATA" => section = Some((false, arg(1)?)),
            "METADATA" => cursor.skip_metadata(),
            "FIELD" | "SCALARS" | "VECTORS" | "NORMALS" => {
                let (is_point, count) = section.ok_or_else(|| anyhow!("{} outside POINT_DATA/CELL_DATA", keyword))?;
                let target = if is_point {
                    &mut parsed.point_data
                } else {
                    &mut parsed.cell_data
                };
                match keyword.as_str() {
                    "FIELD" => {
                        let mut remaining = arg(2)?;
                        while remaining > 0 {
                            let header = cursor
                                .keyword_line()
                                .ok_or_else(|| anyhow!("FIELD ends early"))?;
                            match header[0].as_str() {
                                "METADATA" => {
                                    cursor.skip_metadata();
                                    continue;
                                }
                                "NULL_ARRAY" => {
                                    remaining -= 1;
                                    continue;
                                }
                                _ => {}
                            }
                            if header.len() < 4 {
                                bail!("malformed FIELD array header {:?}", header);
                            }
                            let components: usize = header[1].parse().context("FIELD component count")?;
                            let tuples: usize = header[2].parse().context("FIELD tuple count")?;
                            let ty = ValueType::parse(&header[3])?;
                            let values = cursor.numbers(components * tuples, ty)?;
                            target.push(to_array(&header[0], components, values)?);
                            remaining -= 1;
                        }
                    }
                    "SCALARS" => {
                        let name = tokens.get(1).ok_or_else(|| anyhow!("SCALARS without name"))?;
                        let ty = ValueType::parse(tokens.get(2).map(String::as_str).unwrap_or("float"))?;
                        let components = tokens.get(3).map(|c| c.parse::<usize>()).transpose()?.unwrap_or(1);
                        let lookup = cursor.keyword_line().ok_or_else(|| anyhow!("SCALARS ends early"))?;
                        if !lookup[0].eq_ignore_ascii_case("LOOKUP_TABLE") {
                            bail!("expected LOOKUP_TABLE after SCALARS {}", name);
                        }
                        let values = cursor.numbers(components * count, ty)?;
                        target.push(to_array(name, components, values)?);
                    }
                    _ => {
                        let name = tokens.get(1).ok_or_else(|| anyhow!("{} without name", keyword))?;
                        let ty = ValueType::parse(tokens.get(2).map(String::as_str).unwrap_or("float"))?;
                        let values = cursor.numbers(3 * count, ty)?;
                        target.push(to_array(name, 3, values)?);
                    }
                }
            }
            other => bail!("unsupported section '{}'", other),
        }
    }
    Ok(parsed)
}

fn decode(bytes: &[u8]) -> anyhow::Result<VtkDataset> {
    let mut cursor = Cursor {
        data: bytes,
        pos: 0,
        binary: false,
    };
    let version = cursor.line().unwrap_or_default();
    if !version.starts_with("# vtk DataFile") {
        bail!("missing legacy VTK header");
    }
    let _title = cursor.line();
    let encoding = cursor.keyword_line().ok_or_else(|| anyhow!("missing encoding line"))?;
    cursor.binary = match encoding[0].to_ascii_uppercase().as_str() {
        "ASCII" => false,
        "BINARY" => true,
        other => bail!("unknown encoding '{}'", other),
    };
    let dataset = cursor.keyword_line().ok_or_else(|| anyhow!("missing DATASET line"))?;
    if dataset.len() < 2 || !dataset[0].eq_ignore_ascii_case("DATASET") {
        bail!("expected DATASET, found {:?}", dataset);
    }
    let kind = dataset[1].to_ascii_uppercase();

    let parsed = parse_sections(&mut cursor)?;
    match kind.as_str() {
        "POLYDATA" => Ok(VtkDataset::PolyData(assemble_polydata(parsed)?)),
        "UNSTRUCTURED_GRID" => Ok(VtkDataset::UnstructuredGrid(assemble_grid(parsed)?)),
        other => bail!("unsupported dataset '{}'", other),
    }
}

fn assemble_polydata(parsed: Parsed) -> anyhow::Result<SurfaceMesh> {
    // Polygons are fanned into triangles; each triangle remembers its cell
    let leading = parsed.verts + parsed.lines.len();
    let mut triangles = Vec::new();
    let mut source = Vec::new();
    for (i, poly) in parsed.polygons.iter().enumerate() {
        if poly.len() < 3 {
            bail!("polygon {} has {} points", i, poly.len());
        }
        for k in 1..poly.len() - 1 {
            triangles.push([poly[0], poly[k], poly[k + 1]]);
            source.push(leading + i);
        }
    }

    let total = leading + parsed.polygons.len();
    let mut cell_data = Vec::new();
    for array in parsed.cell_data {
        if array.len() != total {
            bail!("cell array '{}' has {} tuples, expected {}", array.name, array.len(), total);
        }
        cell_data.push(array.gathered(&source));
    }
    check_point_data(&parsed.point_data, parsed.points.len())?;

    Ok(SurfaceMesh {
        points: parsed.points,
        triangles,
        lines: parsed.lines,
        point_data: parsed.point_data,
        cell_data,
    })
}

fn assemble_grid(parsed: Parsed) -> anyhow::Result<VolumeMesh> {
    if parsed.cells.len() != parsed.cell_types.len() {
        bail!("{} cells but {} cell types", parsed.cells.len(), parsed.cell_types.len());
    }
    let cells = parsed
        .cells
        .into_iter()
        .zip(&parsed.cell_types)
        .map(|(points, &id)| {
            let kind = i32::try_from(id)
                .ok()
                .and_then(CellType::from_vtk_id)
                .ok_or_else(|| anyhow!("unsupported cell type {}", id))?;
            if points.len() != kind.point_count() {
                bail!("cell of type {} has {} points", id, points.len());
            }
            Ok(Cell { kind, points })
        })
        .collect::<anyhow::Result<Vec<Cell>>>()?;

    for array in &parsed.cell_data {
        if array.len() != cells.len() {
            bail!("cell array '{}' has {} tuples, expected {}", array.name, array.len(), cells.len());
        }
    }
    check_point_data(&parsed.point_data, parsed.points.len())?;

    Ok(VolumeMesh {
        points: parsed.points,
        cells,
        point_data: parsed.point_data,
        cell_data: parsed.cell_data,
    })
}

fn check_point_data(arrays: &[DataArray], count: usize) -> anyhow::Result<()> {
    for array in arrays {
        if array.len() != count {
            bail!("point array '{}' has {} tuples, expected {}", array.name, array.len(), count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use nalgebra::Vector3;

    fn tagged_box() -> SurfaceMesh {
        let mut mesh = box_surface(Point3::new(0.1, -0.2, 0.3), Vector3::new(1.0 / 3.0, 0.7, 1e-7));
        let values: Vec<f64> = mesh.points.iter().map(|p| p.x * 1e10 + p.z).collect();
        mesh.point_data.push(DataArray::scalars_f64("Distance To Centerlines", values));
        mesh.lines.push(vec![0, 7]);
        mesh
    }

    #[test]
    fn test_ascii_polydata_is_lossless() -> anyhow::Result<()> {
        let mesh = tagged_box();
        let bytes = encode_polydata(&mesh, VtkEncoding::Ascii)?;
        let text = String::from_utf8(bytes.clone())?;
        assert!(text.starts_with("# vtk DataFile Version 3.0\n"));
        assert!(text.contains("ModelFaceID 1 13 int"));

        match decode(&bytes)? {
            VtkDataset::PolyData(back) => assert_eq!(back, mesh),
            other => panic!("unexpected dataset {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_binary_polydata_roundtrip() -> anyhow::Result<()> {
        let mesh = tagged_box();
        let bytes = encode_polydata(&mesh, VtkEncoding::Binary)?;
        match decode(&bytes)? {
            VtkDataset::PolyData(back) => assert_eq!(back, mesh),
            other => panic!("unexpected dataset {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_unstructured_grid_roundtrip() -> anyhow::Result<()> {
        let mut grid = VolumeMesh::new();
        grid.points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.5, 0.5, 2.0),
        ];
        grid.cells = vec![Cell::tetra([0, 1, 2, 3]), Cell::wedge([0, 1, 2, 3, 4, 5])];
        grid.set_cell_array(DataArray::scalars_i32("ModelRegionID", vec![1, 2]));

        for encoding in [VtkEncoding::Ascii, VtkEncoding::Binary] {
            let bytes = encode_unstructured_grid(&grid, encoding)?;
            match decode(&bytes)? {
                VtkDataset::UnstructuredGrid(back) => assert_eq!(back, grid),
                other => panic!("unexpected dataset {:?}", other),
            }
        }
        Ok(())
    }

    #[test]
    fn test_reads_scalars_and_quads() -> anyhow::Result<()> {
        let text = "# vtk DataFile Version 3.0\nquad\nASCII\nDATASET POLYDATA\n\
                    POINTS 4 float\n0 0 0 1 0 0 1 1 0 0 1 0\n\
                    POLYGONS 1 5\n4 0 1 2 3\n\
                    CELL_DATA 1\nSCALARS ModelFaceID int 1\nLOOKUP_TABLE default\n7\n";
        match decode(text.as_bytes())? {
            VtkDataset::PolyData(mesh) => {
                assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
                assert_eq!(mesh.face_ids(), Some(&[7, 7][..]));
            }
            other => panic!("unexpected dataset {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(decode(b"not a vtk file\n").is_err());
        let truncated = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\nPOINTS 2 double\n0 0 0\n";
        assert!(decode(truncated.as_bytes()).is_err());
        let out_of_range = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\n\
                            POINTS 3 double\n0 0 0 1 0 0 0 1 0\nPOLYGONS 1 4\n3 0 1 5\n";
        assert!(decode(out_of_range.as_bytes()).is_err());
    }
}
