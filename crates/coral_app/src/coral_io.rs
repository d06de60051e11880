// SPDX-License-Identifier: MIT OR Apache-2.0
//! `coralIO:1.0` text format.
//!
//! ```text
//! coralIO:1.0
//! type:matrix
//! elementsPerFrame:2
//! frames:3
//! 1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1
//! ...
//! ```
//!
//! Matrix files hold one row of 16 row-major floats per element per frame.
//! Skin weight files hold `vertex:i,deformer:j,weight:w` rows after a
//! `vertices:V` / `deformers:D` header. Both can be written; matrix files
//! can also be read back and played through the `CoralIOImporter` node.

use crate::error::{AppError, Result};
use coral_graph::{
    AttributeClass, AttributeTemplate, EvaluationError, NodeCategory, NodeClass, NodeLogic,
    TypeTag, UpdateContext, Value,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// First line of every file
pub const HEADER: &str = "coralIO:1.0";

/// Line holding the frame count of a matrix file
const FRAMES_LINE: usize = 4;

/// Animated matrices, `elements_per_frame` per frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixCache {
    /// Matrices in each frame
    pub elements_per_frame: usize,
    /// Row-major matrices, one `Vec` per frame
    pub frames: Vec<Vec<[f32; 16]>>,
}

impl MatrixCache {
    /// Matrices of `frame`, clamped to the cached range
    pub fn frame(&self, frame: i64) -> Option<&[[f32; 16]]> {
        let last = self.frames.len().checked_sub(1)?;
        let index = usize::try_from(frame.max(0)).unwrap_or(0).min(last);
        self.frames.get(index).map(Vec::as_slice)
    }
}

/// One vertex/deformer weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinWeight {
    /// Vertex index
    pub vertex: usize,
    /// Deformer index
    pub deformer: usize,
    /// Weight
    pub weight: f32,
}

/// Skin weights of a mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinWeights {
    /// Vertex count
    pub vertices: usize,
    /// Deformer count
    pub deformers: usize,
    /// Non-zero weights
    pub weights: Vec<SkinWeight>,
}

/// Encode a matrix cache
pub fn write_matrix(cache: &MatrixCache) -> String {
    let mut out = format!(
        "{HEADER}\ntype:matrix\nelementsPerFrame:{}\nframes:{}\n",
        cache.elements_per_frame,
        cache.frames.len()
    );
    for matrix in cache.frames.iter().flatten() {
        let row: Vec<String> = matrix.iter().map(f32::to_string).collect();
        let _ = writeln!(out, "{}", row.join(","));
    }
    out
}

/// Encode skin weights
pub fn write_skin_weights(weights: &SkinWeights) -> String {
    let mut out = format!(
        "{HEADER}\ntype:skinWeight\nvertices:{}\ndeformers:{}\n",
        weights.vertices, weights.deformers
    );
    for w in &weights.weights {
        let _ = writeln!(
            out,
            "vertex:{},deformer:{},weight:{}",
            w.vertex, w.deformer, w.weight
        );
    }
    out
}

fn parse_error(line: usize, message: impl Into<String>) -> AppError {
    AppError::CoralIo {
        line,
        message: message.into(),
    }
}

/// Value of a `key:value` header line
fn header_field<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
    key: &str,
) -> Result<(usize, &'a str)> {
    let (number, line) = lines
        .next()
        .ok_or_else(|| parse_error(0, format!("missing `{key}` line")))?;
    match line.trim().split_once(':') {
        Some((k, value)) if k == key => Ok((number, value)),
        _ => Err(parse_error(number, format!("expected `{key}:`"))),
    }
}

fn header_count<'a>(lines: &mut impl Iterator<Item = (usize, &'a str)>, key: &str) -> Result<usize> {
    let (number, value) = header_field(lines, key)?;
    value
        .trim()
        .parse()
        .map_err(|_| parse_error(number, format!("`{key}` is not a count")))
}

/// Decode a matrix file
pub fn read_matrix(text: &str) -> Result<MatrixCache> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    let (number, version) = header_field(&mut lines, "coralIO")?;
    if version.trim() != "1.0" {
        return Err(parse_error(number, format!("unsupported version {version}")));
    }
    let (number, kind) = header_field(&mut lines, "type")?;
    if kind.trim() != "matrix" {
        return Err(parse_error(number, format!("expected a matrix file, found `{kind}`")));
    }
    let elements_per_frame = header_count(&mut lines, "elementsPerFrame")?;
    let frame_count = header_count(&mut lines, "frames")?;
    if elements_per_frame == 0 && frame_count > 0 {
        return Err(parse_error(FRAMES_LINE, "frames without elements"));
    }
    let expected = elements_per_frame
        .checked_mul(frame_count)
        .ok_or_else(|| parse_error(FRAMES_LINE, "matrix count overflows"))?;

    let mut matrices = Vec::new();
    for (number, line) in lines.filter(|(_, l)| !l.trim().is_empty()) {
        if matrices.len() == expected {
            return Err(parse_error(
                number,
                format!("more than the {expected} matrices announced"),
            ));
        }
        let mut matrix = coral_graph::value::IDENTITY;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 16 {
            return Err(parse_error(
                number,
                format!("expected 16 values, found {}", fields.len()),
            ));
        }
        for (slot, field) in matrix.iter_mut().zip(fields) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| parse_error(number, format!("`{field}` is not a number")))?;
        }
        matrices.push(matrix);
    }

    if matrices.len() != expected {
        return Err(parse_error(
            0,
            format!("expected {expected} matrices, found {}", matrices.len()),
        ));
    }

    let frames = if elements_per_frame == 0 {
        Vec::new()
    } else {
        matrices
            .chunks(elements_per_frame)
            .map(<[[f32; 16]]>::to_vec)
            .collect()
    };
    Ok(MatrixCache {
        elements_per_frame,
        frames,
    })
}

/// Write a matrix cache to `path`
pub fn save_matrix(path: &Path, cache: &MatrixCache) -> Result<()> {
    std::fs::write(path, write_matrix(cache))?;
    tracing::info!(path = %path.display(), frames = cache.frames.len(), "coralIO: saved file");
    Ok(())
}

/// Write skin weights to `path`
pub fn save_skin_weights(path: &Path, weights: &SkinWeights) -> Result<()> {
    std::fs::write(path, write_skin_weights(weights))?;
    tracing::info!(path = %path.display(), weights = weights.weights.len(), "coralIO: saved file");
    Ok(())
}

/// Read a matrix cache from `path`
pub fn load_matrix(path: &Path) -> Result<MatrixCache> {
    read_matrix(&std::fs::read_to_string(path)?)
}

/// Files kept decoded by one importer class
const CACHED_FILES: usize = 16;

struct CachedFile {
    modified: SystemTime,
    cache: Arc<MatrixCache>,
}

/// Plays back a matrix file: `out` holds the matrices of frame `time`.
///
/// Decoded files are kept until they change on disk; the least recently
/// loaded one is dropped past [`CACHED_FILES`].
#[derive(Default)]
pub struct MatrixImporter {
    cache: Mutex<IndexMap<PathBuf, CachedFile>>,
}

impl MatrixImporter {
    fn cached(&self, path: &Path) -> std::result::Result<Arc<MatrixCache>, EvaluationError> {
        let failed = |e: AppError| EvaluationError::Custom(e.to_string());
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| failed(e.into()))?;

        let mut files = self.cache.lock();
        if let Some(hit) = files.get(path).filter(|f| f.modified == modified) {
            return Ok(Arc::clone(&hit.cache));
        }

        let loaded = Arc::new(load_matrix(path).map_err(failed)?);
        tracing::debug!(path = %path.display(), frames = loaded.frames.len(), "Cached coralIO file");
        files.shift_remove(path);
        if files.len() >= CACHED_FILES {
            files.shift_remove_index(0);
        }
        files.insert(
            path.to_path_buf(),
            CachedFile {
                modified,
                cache: Arc::clone(&loaded),
            },
        );
        Ok(loaded)
    }

    /// Number of decoded files held
    pub fn cached_files(&self) -> usize {
        self.cache.lock().len()
    }
}

impl NodeLogic for MatrixImporter {
    fn update(&self, ctx: &mut UpdateContext) -> std::result::Result<(), EvaluationError> {
        let file = ctx.input("fileName")?;
        let file = file.as_str().ok_or_else(|| EvaluationError::TypeMismatch {
            attribute: "fileName".to_string(),
            found: file.type_tag(),
        })?;
        if file.is_empty() {
            ctx.set_output("out", Value::Matrix44Array(Vec::new()));
            return Ok(());
        }

        let frame = ctx.input("time")?.as_float().unwrap_or(0.0) as i64;
        let cache = self.cached(Path::new(file))?;
        let matrices = cache.frame(frame).map(<[[f32; 16]]>::to_vec).unwrap_or_default();
        ctx.set_output("out", Value::Matrix44Array(matrices));
        Ok(())
    }
}

/// Node class reading matrix files
pub fn importer_class() -> NodeClass {
    NodeClass::new("CoralIOImporter", NodeCategory::Custom, Arc::new(MatrixImporter::default()))
        .with_description("Plays back a coralIO matrix file")
        .with_attribute(AttributeTemplate::input("fileName", AttributeClass::String))
        .with_attribute(
            AttributeTemplate::input("time", AttributeClass::Numeric)
                .with_allowed([TypeTag::Float])
                .with_default(Value::Float(0.0)),
        )
        .with_attribute(
            AttributeTemplate::output("out", AttributeClass::Numeric)
                .with_allowed([TypeTag::Matrix44Array])
                .with_default(Value::Matrix44Array(Vec::new())),
        )
        .with_affect("fileName", "out")
        .with_affect("time", "out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coral_graph::value::IDENTITY;
    use coral_graph::Network;

    fn translate(x: f32) -> [f32; 16] {
        let mut m = IDENTITY;
        m[12] = x;
        m
    }

    fn sample() -> MatrixCache {
        MatrixCache {
            elements_per_frame: 2,
            frames: (0..3)
                .map(|f| vec![translate(f as f32), translate(f as f32 + 0.5)])
                .collect(),
        }
    }

    #[test]
    fn test_write_matrix_layout() {
        let text = write_matrix(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "coralIO:1.0");
        assert_eq!(lines[1], "type:matrix");
        assert_eq!(lines[2], "elementsPerFrame:2");
        assert_eq!(lines[3], "frames:3");
        assert_eq!(lines.len(), 4 + 6);
        assert_eq!(lines[6], "1,0,0,0,0,1,0,0,0,0,1,0,1,0,0,1");
    }

    #[test]
    fn test_read_matrix_back() {
        let cache = read_matrix(&write_matrix(&sample())).unwrap();
        assert_eq!(cache, sample());
        assert_eq!(cache.frame(1).unwrap()[1][12], 1.5);
        assert_eq!(cache.frame(-4).unwrap()[0][12], 0.0);
        assert_eq!(cache.frame(99).unwrap()[0][12], 2.0);
    }

    #[test]
    fn test_read_accepts_python_floats() {
        let text = "coralIO:1.0\ntype:matrix\nelementsPerFrame:1\nframes:1\n\
                    1.0,0.0,0.0,0.0,0.0,1.0,0.0,0.0,0.0,0.0,1.0,0.0,3.5,0.0,0.0,1.0\n";
        let cache = read_matrix(text).unwrap();
        assert_eq!(cache.frames[0][0][12], 3.5);
    }

    #[test]
    fn test_read_rejects_malformed() {
        let short_row = "coralIO:1.0\ntype:matrix\nelementsPerFrame:1\nframes:1\n1,2,3\n";
        assert!(matches!(
            read_matrix(short_row),
            Err(AppError::CoralIo { line: 5, .. })
        ));

        let wrong_type = "coralIO:1.0\ntype:skinWeight\nvertices:1\ndeformers:1\n";
        assert!(matches!(
            read_matrix(wrong_type),
            Err(AppError::CoralIo { line: 2, .. })
        ));

        let missing = "coralIO:1.0\ntype:matrix\nelementsPerFrame:1\nframes:2\n";
        assert!(read_matrix(missing).is_err());
    }

    #[test]
    fn test_read_rejects_oversized_counts() {
        let overflow = format!(
            "coralIO:1.0\ntype:matrix\nelementsPerFrame:{}\nframes:2\n",
            usize::MAX
        );
        assert!(matches!(
            read_matrix(&overflow),
            Err(AppError::CoralIo { line: 4, .. })
        ));

        let huge = "coralIO:1.0\ntype:matrix\nelementsPerFrame:1000000000\nframes:10\n\
                    1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1\n";
        assert!(matches!(
            read_matrix(huge),
            Err(AppError::CoralIo { line: 0, .. })
        ));

        let empty_frames = format!(
            "coralIO:1.0\ntype:matrix\nelementsPerFrame:0\nframes:{}\n",
            usize::MAX
        );
        assert!(read_matrix(&empty_frames).is_err());

        let extra_row = "coralIO:1.0\ntype:matrix\nelementsPerFrame:1\nframes:1\n\
                         1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1\n\
                         1,0,0,0,0,1,0,0,0,0,1,0,0,0,0,1\n";
        assert!(matches!(
            read_matrix(extra_row),
            Err(AppError::CoralIo { line: 6, .. })
        ));
    }

    #[test]
    fn test_importer_failure_is_recompute_error() {
        let path = std::env::temp_dir().join(format!("coral-io-bad-{}.txt", std::process::id()));
        std::fs::write(
            &path,
            format!("coralIO:1.0\ntype:matrix\nelementsPerFrame:{}\nframes:3\n", usize::MAX),
        )
        .unwrap();

        let mut network = Network::with_builtins("io");
        network.register_class(importer_class());
        let importer = network.add_node("CoralIOImporter", "importer").unwrap();
        let file = network.find_child_attribute(importer, "fileName").unwrap();
        let out = network.find_child_attribute(importer, "out").unwrap();
        network
            .set_value(file, Value::String(path.display().to_string()))
            .unwrap();
        let result = network.value(out);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(coral_graph::GraphError::RecomputeFailure { .. })
        ));
    }

    #[test]
    fn test_importer_rereads_changed_file() {
        let path = std::env::temp_dir().join(format!("coral-io-changed-{}.txt", std::process::id()));
        let importer = MatrixImporter::default();
        save_matrix(&path, &sample()).unwrap();
        assert_eq!(importer.cached(&path).unwrap().frames.len(), 3);

        let single = MatrixCache {
            elements_per_frame: 1,
            frames: vec![vec![translate(7.0)]],
        };
        save_matrix(&path, &single).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + std::time::Duration::from_secs(60))
            .unwrap();
        let reloaded = importer.cached(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(*reloaded, single);
        assert_eq!(importer.cached_files(), 1);
    }

    #[test]
    fn test_write_skin_weights() {
        let weights = SkinWeights {
            vertices: 2,
            deformers: 1,
            weights: vec![
                SkinWeight { vertex: 0, deformer: 0, weight: 1.0 },
                SkinWeight { vertex: 1, deformer: 0, weight: 0.25 },
            ],
        };
        let text = write_skin_weights(&weights);
        assert_eq!(
            text,
            "coralIO:1.0\ntype:skinWeight\nvertices:2\ndeformers:1\n\
             vertex:0,deformer:0,weight:1\nvertex:1,deformer:0,weight:0.25\n"
        );
    }

    #[test]
    fn test_importer_node_plays_frames() {
        let path = std::env::temp_dir().join(format!("coral-io-{}.txt", std::process::id()));
        save_matrix(&path, &sample()).unwrap();

        let mut network = Network::with_builtins("io");
        network.register_class(importer_class());
        let importer = network.add_node("CoralIOImporter", "importer").unwrap();
        let file = network.find_child_attribute(importer, "fileName").unwrap();
        let time = network.find_child_attribute(importer, "time").unwrap();
        let out = network.find_child_attribute(importer, "out").unwrap();

        assert_eq!(network.value(out).unwrap(), Value::Matrix44Array(Vec::new()));
        network
            .set_value(file, Value::String(path.display().to_string()))
            .unwrap();
        network.set_value(time, Value::Float(2.0)).unwrap();
        let frame = network.value(out).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            frame,
            Value::Matrix44Array(vec![translate(2.0), translate(2.5)])
        );
    }
}
