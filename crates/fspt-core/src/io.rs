//! Binary persistence.
//!
//! Little-endian, self-describing format: a magic/version header, the
//! tree record, the nodes in pre-order, then two skippable trailing
//! blocks holding the criterion config (with its counters) and the
//! score config. Each trailing block is prefixed with a `contains`
//! flag, a block version and a byte size, so a loader that does not
//! understand a block seeks past it and keeps the tree.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::warn;
use ndarray::Array2;

use crate::config::{
    Calibration, FitCounters, GiniConfig, ScoreConfig, UniformityTestLevel,
};
use crate::criterion::CriterionKind;
use crate::error::{Error, Result};
use crate::node::{Node, NodeId, NodeKind, RefusalCause};
use crate::tree::{Fspt, ROOT};

const MAGIC: [u8; 4] = *b"FSPT";
const FORMAT_VERSION: i32 = 1;
const CRITERION_BLOCK_VERSION: i32 = 1;
const SCORE_BLOCK_VERSION: i32 = 1;

const TAG_LEAF: i32 = 0;
const TAG_INNER: i32 = 1;

impl Fspt {
    /// Saves the tree to `path`. With `include_samples` the leaf sample
    /// blocks are stored too, so a later load can refit or inspect
    /// them.
    pub fn save<P: AsRef<Path>>(&self, path: P, include_samples: bool) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_to(&mut writer, include_samples)?;
        writer.flush().map_err(map_write)
    }

    /// Loads a tree from `path`; `load_samples` asks for the stored
    /// sample blocks (ignored when the file has none).
    pub fn load<P: AsRef<Path>>(path: P, load_samples: bool) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::load_from(&mut reader, load_samples)
    }

    /// Serialises the tree into any writer.
    pub fn save_to<W: Write>(&self, writer: &mut W, include_samples: bool) -> Result<()> {
        writer.write_all(&MAGIC).map_err(map_write)?;
        write_i32(writer, FORMAT_VERSION)?;

        write_i32(writer, self.n_features as i32)?;
        for &(lo, hi) in &self.bounds {
            write_f32(writer, lo)?;
            write_f32(writer, hi)?;
        }
        for &weight in &self.importance {
            write_f32(writer, weight)?;
        }
        write_i32(writer, self.nodes.len() as i32)?;
        write_i32(writer, self.depth as i32)?;
        write_f64(writer, self.volume)?;
        write_i32(writer, include_samples as i32)?;

        self.write_node(writer, ROOT, include_samples)?;

        // Criterion block: kind, thresholds, refusal counters.
        match &self.fit_config {
            Some(config) => {
                let block = encode_criterion_block(self.criterion, config, &self.counters);
                write_i32(writer, 1)?;
                write_i32(writer, CRITERION_BLOCK_VERSION)?;
                write_u64(writer, block.len() as u64)?;
                writer.write_all(&block).map_err(map_write)?;
            }
            None => write_i32(writer, 0)?,
        }

        // Score block: kind and normalisation parameters.
        let block = encode_score_block(&self.score_config);
        write_i32(writer, 1)?;
        write_i32(writer, SCORE_BLOCK_VERSION)?;
        write_u64(writer, block.len() as u64)?;
        writer.write_all(&block).map_err(map_write)?;
        Ok(())
    }

    fn write_node<W: Write>(
        &self,
        writer: &mut W,
        id: NodeId,
        include_samples: bool,
    ) -> Result<()> {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Leaf {
                ref rows, score, ..
            } => {
                write_i32(writer, TAG_LEAF)?;
                write_node_common(writer, node)?;
                write_f32(writer, score)?;
                if include_samples {
                    let data = self.samples.as_slice().expect("samples are row-major");
                    let d = self.n_features;
                    for &value in &data[rows.start * d..rows.end * d] {
                        write_f32(writer, value)?;
                    }
                }
                Ok(())
            }
            NodeKind::Inner {
                split_feature,
                split_value,
                left,
                right,
            } => {
                write_i32(writer, TAG_INNER)?;
                write_node_common(writer, node)?;
                write_f32(writer, 0.0)?;
                write_i32(writer, split_feature as i32)?;
                write_f32(writer, split_value)?;
                self.write_node(writer, left, include_samples)?;
                self.write_node(writer, right, include_samples)
            }
        }
    }

    /// Deserialises a tree from any seekable reader.
    pub fn load_from<R: Read + Seek>(reader: &mut R, load_samples: bool) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(map_read)?;
        if magic != MAGIC {
            return Err(Error::BadFormat("bad magic number".into()));
        }
        let version = read_i32(reader)?;
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let d = read_i32(reader)?;
        if d <= 0 {
            return Err(Error::BadFormat(format!("non-positive dimension {d}")));
        }
        let d = d as usize;
        let mut bounds = Vec::with_capacity(d);
        for _ in 0..d {
            bounds.push((read_f32(reader)?, read_f32(reader)?));
        }
        let mut importance = Vec::with_capacity(d);
        for _ in 0..d {
            importance.push(read_f32(reader)?);
        }
        let n_nodes = read_i32(reader)? as usize;
        let depth = read_i32(reader)? as usize;
        let volume = read_f64(reader)?;
        let saved_samples = read_i32(reader)? != 0;

        let mut nodes = Vec::with_capacity(n_nodes);
        let mut sample_data = Vec::new();
        read_node(
            reader,
            d,
            saved_samples,
            load_samples,
            None,
            &mut nodes,
            &mut sample_data,
        )?;
        if nodes.len() != n_nodes {
            return Err(Error::BadFormat(format!(
                "header says {n_nodes} nodes, file holds {}",
                nodes.len()
            )));
        }

        let mut criterion = CriterionKind::default();
        let mut fit_config = None;
        let mut counters = FitCounters::default();
        if read_i32(reader)? != 0 {
            let block_version = read_i32(reader)?;
            let size = read_u64(reader)?;
            if block_version == CRITERION_BLOCK_VERSION && size == CRITERION_BLOCK_SIZE {
                let (kind, config, saved_counters) = decode_criterion_block(reader)?;
                criterion = kind;
                fit_config = Some(config);
                counters = saved_counters;
            } else {
                warn!(
                    "skipping criterion block (version {block_version}, {size} bytes)"
                );
                reader.seek(SeekFrom::Current(size as i64))?;
            }
        }

        let mut score_config = ScoreConfig::default();
        if read_i32(reader)? != 0 {
            let block_version = read_i32(reader)?;
            let size = read_u64(reader)?;
            if block_version == SCORE_BLOCK_VERSION && size == SCORE_BLOCK_SIZE {
                score_config = decode_score_block(reader)?;
            } else {
                warn!("skipping score block (version {block_version}, {size} bytes)");
                reader.seek(SeekFrom::Current(size as i64))?;
            }
        }

        let n_samples = nodes[ROOT].n_samples;
        let samples = if load_samples && saved_samples {
            Array2::from_shape_vec((sample_data.len() / d, d), sample_data)
                .map_err(|e| Error::BadFormat(e.to_string()))?
        } else {
            Array2::zeros((0, d))
        };
        let min_samples = fit_config
            .as_ref()
            .map(|config: &GiniConfig| config.min_samples)
            .unwrap_or_else(|| GiniConfig::default().min_samples);

        Ok(Fspt {
            n_features: d,
            bounds,
            importance,
            criterion,
            score_config,
            nodes,
            samples,
            volume,
            depth,
            n_samples,
            min_samples,
            fit_config,
            counters,
            score_report: None,
        })
    }
}

fn write_node_common<W: Write>(writer: &mut W, node: &Node) -> Result<()> {
    write_i32(writer, node.n_samples as i32)?;
    write_f32(writer, node.n_empty)?;
    write_i32(writer, node.depth as i32)?;
    write_i32(writer, node.cause.to_tag())?;
    write_f64(writer, node.volume)
}

fn read_node<R: Read>(
    reader: &mut R,
    d: usize,
    saved_samples: bool,
    load_samples: bool,
    parent: Option<NodeId>,
    nodes: &mut Vec<Node>,
    sample_data: &mut Vec<f32>,
) -> Result<NodeId> {
    let tag = read_i32(reader)?;
    let n_samples = read_i32(reader)? as usize;
    let n_empty = read_f32(reader)?;
    let depth = read_i32(reader)? as usize;
    let cause_tag = read_i32(reader)?;
    let cause = RefusalCause::from_tag(cause_tag)
        .ok_or_else(|| Error::BadFormat(format!("unknown refusal cause {cause_tag}")))?;
    let volume = read_f64(reader)?;
    let score = read_f32(reader)?;

    let id = nodes.len();
    nodes.push(Node {
        depth,
        n_samples,
        n_empty,
        volume,
        parent,
        cause,
        kind: NodeKind::Leaf {
            rows: 0..0,
            score,
            gain_violations: 0,
        },
    });

    match tag {
        TAG_LEAF => {
            if saved_samples {
                let start = sample_data.len() / d;
                for _ in 0..n_samples * d {
                    let value = read_f32(reader)?;
                    if load_samples {
                        sample_data.push(value);
                    }
                }
                if load_samples {
                    if let NodeKind::Leaf { rows, .. } = &mut nodes[id].kind {
                        *rows = start..start + n_samples;
                    }
                }
            }
            Ok(id)
        }
        TAG_INNER => {
            let split_feature = read_i32(reader)? as usize;
            let split_value = read_f32(reader)?;
            if split_feature >= d {
                return Err(Error::BadFormat(format!(
                    "split feature {split_feature} out of range"
                )));
            }
            let left = read_node(
                reader,
                d,
                saved_samples,
                load_samples,
                Some(id),
                nodes,
                sample_data,
            )?;
            let right = read_node(
                reader,
                d,
                saved_samples,
                load_samples,
                Some(id),
                nodes,
                sample_data,
            )?;
            nodes[id].kind = NodeKind::Inner {
                split_feature,
                split_value,
                left,
                right,
            };
            Ok(id)
        }
        other => Err(Error::BadFormat(format!("unknown node tag {other}"))),
    }
}

// Criterion block: kind + 13 config fields + 8 counters, fixed layout.
// Eight i32s, two f32s, four f64s, eight u64 counters.
const CRITERION_BLOCK_SIZE: u64 = 8 * 4 + 2 * 4 + 4 * 8 + 8 * 8;

fn encode_criterion_block(
    kind: CriterionKind,
    config: &GiniConfig,
    counters: &FitCounters,
) -> Vec<u8> {
    let mut block = Vec::new();
    push_i32(&mut block, kind.to_tag());
    push_i32(&mut block, config.max_depth as i32);
    push_i32(&mut block, config.min_samples as i32);
    push_f64(&mut block, config.min_volume_p);
    push_f64(&mut block, config.min_length_p);
    push_f32(&mut block, config.max_tries_p);
    push_f32(&mut block, config.max_features_p);
    push_f64(&mut block, config.gini_gain_thresh);
    push_i32(&mut block, config.max_consecutive_gain_violations as i32);
    push_i32(&mut block, config.middle_split as i32);
    push_i32(&mut block, config.multi_threads as i32);
    push_i32(&mut block, config.uniformity_test_level.to_tag());
    push_f64(&mut block, config.unf_alpha);
    push_i32(&mut block, config.merge_nodes as i32);
    for count in [
        counters.no_sample,
        counters.min_samples,
        counters.max_depth,
        counters.min_volume,
        counters.min_length,
        counters.max_count,
        counters.uniformity,
        counters.unknown,
    ] {
        push_u64(&mut block, count);
    }
    debug_assert_eq!(block.len() as u64, CRITERION_BLOCK_SIZE);
    block
}

fn decode_criterion_block<R: Read>(
    reader: &mut R,
) -> Result<(CriterionKind, GiniConfig, FitCounters)> {
    let kind_tag = read_i32(reader)?;
    let kind = CriterionKind::from_tag(kind_tag)
        .ok_or_else(|| Error::BadFormat(format!("unknown criterion kind {kind_tag}")))?;
    let max_depth = read_i32(reader)? as usize;
    let min_samples = read_i32(reader)? as usize;
    let min_volume_p = read_f64(reader)?;
    let min_length_p = read_f64(reader)?;
    let max_tries_p = read_f32(reader)?;
    let max_features_p = read_f32(reader)?;
    let gini_gain_thresh = read_f64(reader)?;
    let max_consecutive_gain_violations = read_i32(reader)? as u32;
    let middle_split = read_i32(reader)? != 0;
    let multi_threads = read_i32(reader)? != 0;
    let level_tag = read_i32(reader)?;
    let uniformity_test_level = UniformityTestLevel::from_tag(level_tag)
        .ok_or_else(|| Error::BadFormat(format!("unknown uniformity level {level_tag}")))?;
    let unf_alpha = read_f64(reader)?;
    let merge_nodes = read_i32(reader)? != 0;
    let config = GiniConfig {
        max_depth,
        min_samples,
        min_volume_p,
        min_length_p,
        max_tries_p,
        max_features_p,
        gini_gain_thresh,
        max_consecutive_gain_violations,
        middle_split,
        multi_threads,
        uniformity_test_level,
        unf_alpha,
        merge_nodes,
    };
    let mut counts = [0u64; 8];
    for count in counts.iter_mut() {
        *count = read_u64(reader)?;
    }
    let counters = FitCounters {
        no_sample: counts[0],
        min_samples: counts[1],
        max_depth: counts[2],
        min_volume: counts[3],
        min_length: counts[4],
        max_count: counts[5],
        uniformity: counts[6],
        unknown: counts[7],
    };
    Ok((kind, config, counters))
}

// Score block: kind + flags + calibration + auto-density thresholds.
const SCORE_BLOCK_SIZE: u64 = 4 * 3 + 8 * 6;

fn encode_score_block(config: &ScoreConfig) -> Vec<u8> {
    let mut block = Vec::new();
    push_i32(&mut block, config.kind.to_tag());
    push_i32(&mut block, config.exponential_normalization as i32);
    push_i32(&mut block, config.calibration.is_some() as i32);
    let cal = config.calibration.unwrap_or(Calibration {
        score: 0.0,
        n_samples_p: 0.0,
        volume_p: 0.0,
    });
    push_f64(&mut block, cal.score);
    push_f64(&mut block, cal.n_samples_p);
    push_f64(&mut block, cal.volume_p);
    push_f64(&mut block, config.samples_p);
    push_f64(&mut block, config.verify_density_thresh);
    push_f64(&mut block, config.verify_n_nodes_p_thresh);
    debug_assert_eq!(block.len() as u64, SCORE_BLOCK_SIZE);
    block
}

fn decode_score_block<R: Read>(reader: &mut R) -> Result<ScoreConfig> {
    let kind_tag = read_i32(reader)?;
    let kind = crate::config::ScoreKind::from_tag(kind_tag)
        .ok_or_else(|| Error::BadFormat(format!("unknown score kind {kind_tag}")))?;
    let exponential_normalization = read_i32(reader)? != 0;
    let has_calibration = read_i32(reader)? != 0;
    let score = read_f64(reader)?;
    let n_samples_p = read_f64(reader)?;
    let volume_p = read_f64(reader)?;
    let samples_p = read_f64(reader)?;
    let verify_density_thresh = read_f64(reader)?;
    let verify_n_nodes_p_thresh = read_f64(reader)?;
    Ok(ScoreConfig {
        kind,
        exponential_normalization,
        calibration: has_calibration.then_some(Calibration {
            score,
            n_samples_p,
            volume_p,
        }),
        samples_p,
        verify_density_thresh,
        verify_n_nodes_p_thresh,
    })
}

fn map_read(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::ShortRead
    } else {
        Error::Io(e)
    }
}

fn map_write(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::WriteZero {
        Error::ShortWrite
    } else {
        Error::Io(e)
    }
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes()).map_err(map_write)
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes()).map_err(map_write)
}

fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_all(&value.to_le_bytes()).map_err(map_write)
}

fn write_f64<W: Write>(writer: &mut W, value: f64) -> Result<()> {
    writer.write_all(&value.to_le_bytes()).map_err(map_write)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer).map_err(map_read)?;
    Ok(i32::from_le_bytes(buffer))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer).map_err(map_read)?;
    Ok(u64::from_le_bytes(buffer))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer).map_err(map_read)?;
    Ok(f32::from_le_bytes(buffer))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer).map_err(map_read)?;
    Ok(f64::from_le_bytes(buffer))
}

fn push_i32(block: &mut Vec<u8>, value: i32) {
    block.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(block: &mut Vec<u8>, value: u64) {
    block.extend_from_slice(&value.to_le_bytes());
}

fn push_f32(block: &mut Vec<u8>, value: f32) {
    block.extend_from_slice(&value.to_le_bytes());
}

fn push_f64(block: &mut Vec<u8>, value: f64) {
    block.extend_from_slice(&value.to_le_bytes());
}
