use super::traits::{Decoded, RecordDecoder, TrajectoryError};
use crate::core::models::system::Snapshot;
use nalgebra::{Matrix3, Vector3};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

const MAGIC: i32 = 1993;
const VERSION: &[u8] = b"GMX_trn_file";
const DIM: usize = 3;
const SIZE_FLOAT: usize = 4;
const SIZE_DOUBLE: usize = 8;
/// Bytes up to and including the thirteen size/count integers.
const FIXED_PREFIX: usize = 4 + 8 + VERSION.len() + 13 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The header of one TRR record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrrHeader {
    pub ir_size: usize,
    pub e_size: usize,
    pub box_size: usize,
    pub vir_size: usize,
    pub pres_size: usize,
    pub top_size: usize,
    pub sym_size: usize,
    pub x_size: usize,
    pub v_size: usize,
    pub f_size: usize,
    pub natoms: usize,
    pub step: i64,
    pub nre: usize,
    pub time: f64,
    pub lambda: f64,
    pub double: bool,
    pub endian: Endian,
}

impl TrrHeader {
    /// Total payload bytes following the header.
    pub fn data_size(&self) -> usize {
        self.box_size + self.vir_size + self.pres_size + self.x_size + self.v_size + self.f_size
    }

    pub fn header_size(&self) -> usize {
        FIXED_PREFIX + 2 * self.precision()
    }

    pub fn precision(&self) -> usize {
        if self.double { SIZE_DOUBLE } else { SIZE_FLOAT }
    }
}

/// One decoded TRR record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrrFrame {
    pub step: i64,
    pub time: f64,
    pub lambda: f64,
    pub box_matrix: Option<Matrix3<f64>>,
    pub virial: Option<Matrix3<f64>>,
    pub pressure: Option<Matrix3<f64>>,
    pub positions: Option<Vec<Vector3<f64>>>,
    pub velocities: Option<Vec<Vector3<f64>>>,
    pub forces: Option<Vec<Vector3<f64>>>,
}

impl TrrFrame {
    pub fn from_snapshot(snapshot: &Snapshot, step: i64, time: f64) -> Self {
        Self {
            step,
            time,
            lambda: 0.0,
            box_matrix: Some(snapshot.box_matrix.unwrap_or_else(Matrix3::zeros)),
            virial: None,
            pressure: None,
            positions: Some(snapshot.positions.clone()),
            velocities: Some(snapshot.velocities.clone()),
            forces: None,
        }
    }

    pub fn natoms(&self) -> usize {
        [&self.positions, &self.velocities, &self.forces]
            .into_iter()
            .flatten()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// Converts the frame into an in-memory configuration.
    ///
    /// An all-zero box is how GROMACS marks a non-periodic system and maps to `None`.
    pub fn to_snapshot(&self) -> Snapshot {
        let positions = self
            .positions
            .clone()
            .unwrap_or_else(|| vec![Vector3::zeros(); self.natoms()]);
        let velocities = self.velocities.clone().unwrap_or_default();
        let mut snapshot = Snapshot::new(positions, velocities);
        snapshot.box_matrix = self.box_matrix.filter(|b| b.iter().any(|&x| x != 0.0));
        snapshot
    }
}

/// Stateless decoder for GROMACS TRR records, detecting byte order and precision per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrrDecoder;

impl RecordDecoder for TrrDecoder {
    type Header = TrrHeader;
    type Frame = TrrFrame;

    fn read_header(
        &self,
        bytes: &[u8],
        offset: u64,
    ) -> Result<Decoded<TrrHeader>, TrajectoryError> {
        if bytes.len() < 4 {
            return Ok(Decoded::NeedMoreData);
        }
        let corrupt = |reason: String| TrajectoryError::CorruptStream { offset, reason };

        let endian = if read_i32(&bytes[0..4], Endian::Little) == MAGIC {
            Endian::Little
        } else if read_i32(&bytes[0..4], Endian::Big) == MAGIC {
            Endian::Big
        } else {
            return Err(corrupt("missing TRR magic number".to_string()));
        };

        if bytes.len() < 12 {
            return Ok(Decoded::NeedMoreData);
        }
        let version_len = read_i32(&bytes[4..8], endian) - 1;
        if version_len != VERSION.len() as i32 {
            return Err(corrupt(format!("unexpected version length {version_len}")));
        }
        if bytes.len() < FIXED_PREFIX {
            return Ok(Decoded::NeedMoreData);
        }
        if &bytes[12..12 + VERSION.len()] != VERSION {
            return Err(corrupt("unknown TRR version string".to_string()));
        }

        let mut ints = [0i32; 13];
        let ints_start = 12 + VERSION.len();
        for (i, value) in ints.iter_mut().enumerate() {
            let at = ints_start + 4 * i;
            *value = read_i32(&bytes[at..at + 4], endian);
        }
        let size = |i: usize| -> Result<usize, TrajectoryError> {
            usize::try_from(ints[i])
                .map_err(|_| corrupt(format!("negative size field {} at position {i}", ints[i])))
        };

        let natoms = size(10)?;
        let mut header = TrrHeader {
            ir_size: size(0)?,
            e_size: size(1)?,
            box_size: size(2)?,
            vir_size: size(3)?,
            pres_size: size(4)?,
            top_size: size(5)?,
            sym_size: size(6)?,
            x_size: size(7)?,
            v_size: size(8)?,
            f_size: size(9)?,
            natoms,
            step: i64::from(ints[11]),
            nre: size(12)?,
            time: 0.0,
            lambda: 0.0,
            double: false,
            endian,
        };
        header.double = detect_double(&header).map_err(corrupt)?;
        validate_sizes(&header).map_err(corrupt)?;

        let precision = header.precision();
        let total = FIXED_PREFIX + 2 * precision;
        if bytes.len() < total {
            return Ok(Decoded::NeedMoreData);
        }
        header.time = read_real(&bytes[FIXED_PREFIX..], endian, header.double);
        header.lambda = read_real(&bytes[FIXED_PREFIX + precision..], endian, header.double);

        Ok(Decoded::Complete {
            value: header,
            consumed: total,
        })
    }

    fn read_data(
        &self,
        bytes: &[u8],
        header: &TrrHeader,
        _offset: u64,
    ) -> Result<Decoded<TrrFrame>, TrajectoryError> {
        let total = header.data_size();
        if bytes.len() < total {
            return Ok(Decoded::NeedMoreData);
        }
        let mut cursor = 0usize;
        let endian = header.endian;
        let double = header.double;
        let box_matrix = next_block(bytes, &mut cursor, header.box_size)
            .map(|b| read_matrix(b, endian, double));
        let virial = next_block(bytes, &mut cursor, header.vir_size)
            .map(|b| read_matrix(b, endian, double));
        let pressure = next_block(bytes, &mut cursor, header.pres_size)
            .map(|b| read_matrix(b, endian, double));
        let positions = next_block(bytes, &mut cursor, header.x_size)
            .map(|b| read_coords(b, endian, double));
        let velocities = next_block(bytes, &mut cursor, header.v_size)
            .map(|b| read_coords(b, endian, double));
        let forces = next_block(bytes, &mut cursor, header.f_size)
            .map(|b| read_coords(b, endian, double));

        Ok(Decoded::Complete {
            value: TrrFrame {
                step: header.step,
                time: header.time,
                lambda: header.lambda,
                box_matrix,
                virial,
                pressure,
                positions,
                velocities,
                forces,
            },
            consumed: total,
        })
    }
}

fn next_block<'a>(bytes: &'a [u8], cursor: &mut usize, size: usize) -> Option<&'a [u8]> {
    if size == 0 {
        return None;
    }
    let block = &bytes[*cursor..*cursor + size];
    *cursor += size;
    Some(block)
}

fn detect_double(header: &TrrHeader) -> Result<bool, String> {
    let per_atom = header.natoms * DIM;
    let candidates = [
        (header.box_size, DIM * DIM),
        (header.x_size, per_atom),
        (header.v_size, per_atom),
        (header.f_size, per_atom),
    ];
    let size = candidates
        .into_iter()
        .find(|&(bytes, _)| bytes != 0)
        .map(|(bytes, count)| if count == 0 { 0 } else { bytes / count })
        .unwrap_or(0);
    match size {
        SIZE_FLOAT => Ok(false),
        SIZE_DOUBLE => Ok(true),
        other => Err(format!("cannot determine precision (element size {other})")),
    }
}

fn validate_sizes(header: &TrrHeader) -> Result<(), String> {
    let precision = header.precision();
    for (name, size) in [
        ("box", header.box_size),
        ("virial", header.vir_size),
        ("pressure", header.pres_size),
    ] {
        if size != 0 && size != DIM * DIM * precision {
            return Err(format!("{name} block of {size} bytes is not a 3x3 matrix"));
        }
    }
    let coords = header.natoms * DIM * precision;
    for (name, size) in [
        ("position", header.x_size),
        ("velocity", header.v_size),
        ("force", header.f_size),
    ] {
        if size != 0 && size != coords {
            return Err(format!(
                "{name} block of {size} bytes does not match {} atoms",
                header.natoms
            ));
        }
    }
    Ok(())
}

fn read_i32(bytes: &[u8], endian: Endian) -> i32 {
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match endian {
        Endian::Little => i32::from_le_bytes(raw),
        Endian::Big => i32::from_be_bytes(raw),
    }
}

fn read_real(bytes: &[u8], endian: Endian, double: bool) -> f64 {
    if double {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match endian {
            Endian::Little => f64::from_le_bytes(raw),
            Endian::Big => f64::from_be_bytes(raw),
        }
    } else {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        f64::from(match endian {
            Endian::Little => f32::from_le_bytes(raw),
            Endian::Big => f32::from_be_bytes(raw),
        })
    }
}

fn read_reals(bytes: &[u8], endian: Endian, double: bool) -> Vec<f64> {
    let precision = if double { SIZE_DOUBLE } else { SIZE_FLOAT };
    bytes
        .chunks_exact(precision)
        .map(|chunk| read_real(chunk, endian, double))
        .collect()
}

fn read_matrix(bytes: &[u8], endian: Endian, double: bool) -> Matrix3<f64> {
    Matrix3::from_row_slice(&read_reals(bytes, endian, double))
}

fn read_coords(bytes: &[u8], endian: Endian, double: bool) -> Vec<Vector3<f64>> {
    read_reals(bytes, endian, double)
        .chunks_exact(DIM)
        .map(Vector3::from_column_slice)
        .collect()
}

/// Serializes frames as little-endian TRR records.
pub struct TrrWriter<W: Write> {
    writer: W,
    double: bool,
}

impl<W: Write> TrrWriter<W> {
    pub fn new(writer: W, double: bool) -> Self {
        Self { writer, double }
    }

    pub fn write_frame(&mut self, frame: &TrrFrame) -> std::io::Result<()> {
        let precision = if self.double { SIZE_DOUBLE } else { SIZE_FLOAT };
        let natoms = frame.natoms();
        let matrix_size = |m: &Option<Matrix3<f64>>| m.map_or(0, |_| DIM * DIM * precision);
        let coord_size = |c: &Option<Vec<Vector3<f64>>>| {
            c.as_ref().map_or(0, |_| natoms * DIM * precision)
        };

        let ints: [i32; 13] = [
            0,
            0,
            matrix_size(&frame.box_matrix) as i32,
            matrix_size(&frame.virial) as i32,
            matrix_size(&frame.pressure) as i32,
            0,
            0,
            coord_size(&frame.positions) as i32,
            coord_size(&frame.velocities) as i32,
            coord_size(&frame.forces) as i32,
            natoms as i32,
            frame.step as i32,
            0,
        ];

        let w = &mut self.writer;
        w.write_all(&MAGIC.to_le_bytes())?;
        w.write_all(&(VERSION.len() as i32 + 1).to_le_bytes())?;
        w.write_all(&(VERSION.len() as i32).to_le_bytes())?;
        w.write_all(VERSION)?;
        for value in ints {
            w.write_all(&value.to_le_bytes())?;
        }
        self.write_real(frame.time)?;
        self.write_real(frame.lambda)?;

        for matrix in [&frame.box_matrix, &frame.virial, &frame.pressure]
            .into_iter()
            .flatten()
        {
            for row in 0..DIM {
                for col in 0..DIM {
                    self.write_real(matrix[(row, col)])?;
                }
            }
        }
        for coords in [&frame.positions, &frame.velocities, &frame.forces]
            .into_iter()
            .flatten()
        {
            for i in 0..natoms {
                let v = coords.get(i).copied().unwrap_or_else(Vector3::zeros);
                for x in v.iter() {
                    self.write_real(*x)?;
                }
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_real(&mut self, value: f64) -> std::io::Result<()> {
        if self.double {
            self.writer.write_all(&value.to_le_bytes())
        } else {
            self.writer.write_all(&(value as f32).to_le_bytes())
        }
    }
}

/// Writes `frames` to `path`, replacing any existing file.
pub fn write_trr_file<P: AsRef<Path>>(
    path: P,
    frames: &[TrrFrame],
    double: bool,
) -> Result<(), TrajectoryError> {
    let mut writer = TrrWriter::new(BufWriter::new(File::create(path)?), double);
    for frame in frames {
        writer.write_frame(frame)?;
    }
    writer.flush()?;
    Ok(())
}

/// Appends one frame to `path`, creating the file if needed.
pub fn append_trr_frame<P: AsRef<Path>>(
    path: P,
    frame: &TrrFrame,
    double: bool,
) -> Result<(), TrajectoryError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = TrrWriter::new(BufWriter::new(file), double);
    writer.write_frame(frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads every frame of a finished TRR file.
pub fn read_trr_file<P: AsRef<Path>>(path: P) -> Result<Vec<TrrFrame>, TrajectoryError> {
    TrrDecoder.read_from_path(path)
}

/// Reads frame `index` of a finished TRR file, skipping the payload of earlier frames.
pub fn read_trr_frame<P: AsRef<Path>>(path: P, index: usize) -> Result<TrrFrame, TrajectoryError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let decoder = TrrDecoder;
    let mut cursor = 0usize;
    let mut current = 0usize;
    while cursor < bytes.len() {
        let (header, header_len) = match decoder.read_header(&bytes[cursor..], cursor as u64)? {
            Decoded::Complete { value, consumed } => (value, consumed),
            Decoded::NeedMoreData => break,
        };
        let data_start = cursor + header_len;
        if current == index {
            return match decoder.read_data(&bytes[data_start..], &header, data_start as u64)? {
                Decoded::Complete { value, .. } => Ok(value),
                Decoded::NeedMoreData => Err(TrajectoryError::CorruptStream {
                    offset: data_start as u64,
                    reason: "truncated frame payload".to_string(),
                }),
            };
        }
        cursor = data_start + header.data_size();
        current += 1;
    }
    Err(TrajectoryError::FrameNotFound {
        path: path.to_path_buf(),
        index,
    })
}

/// Reads the header of every record in a finished TRR file without decoding payloads.
pub fn read_trr_headers<P: AsRef<Path>>(path: P) -> Result<Vec<TrrHeader>, TrajectoryError> {
    let bytes = std::fs::read(path)?;
    let mut headers = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let (header, header_len) = match TrrDecoder.read_header(&bytes[cursor..], cursor as u64)? {
            Decoded::Complete { value, consumed } => (value, consumed),
            Decoded::NeedMoreData => {
                return Err(TrajectoryError::CorruptStream {
                    offset: cursor as u64,
                    reason: "truncated record header".to_string(),
                });
            }
        };
        let next = cursor + header_len + header.data_size();
        if next > bytes.len() {
            return Err(TrajectoryError::CorruptStream {
                offset: (cursor + header_len) as u64,
                reason: "truncated frame payload".to_string(),
            });
        }
        headers.push(header);
        cursor = next;
    }
    Ok(headers)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn frame(step: i64, natoms: usize) -> TrrFrame {
        let positions = (0..natoms)
            .map(|i| Vector3::new(step as f64 + i as f64, 0.5, -1.0))
            .collect();
        let velocities = (0..natoms)
            .map(|i| Vector3::new(1.0, i as f64, 0.25))
            .collect();
        TrrFrame {
            step,
            time: step as f64 * 0.5,
            lambda: 0.0,
            box_matrix: Some(Matrix3::from_diagonal_element(10.0)),
            virial: None,
            pressure: None,
            positions: Some(positions),
            velocities: Some(velocities),
            forces: None,
        }
    }

    pub(crate) fn encode(frames: &[TrrFrame], double: bool) -> Vec<u8> {
        let mut writer = TrrWriter::new(Vec::new(), double);
        for f in frames {
            writer.write_frame(f).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn header_size_matches_precision() {
        let single = encode(&[frame(0, 2)], false);
        let double = encode(&[frame(0, 2)], true);
        let Decoded::Complete { value, consumed } = TrrDecoder.read_header(&single, 0).unwrap()
        else {
            panic!("expected a complete header");
        };
        assert_eq!(consumed, 84);
        assert!(!value.double);
        assert_eq!(value.data_size(), 9 * 4 + 2 * 2 * 3 * 4);
        let Decoded::Complete { consumed, .. } = TrrDecoder.read_header(&double, 0).unwrap() else {
            panic!("expected a complete header");
        };
        assert_eq!(consumed, 92);
    }

    #[test]
    fn decoding_complete_records_consumes_the_whole_buffer() {
        let frames: Vec<_> = (0..4).map(|s| frame(s, 3)).collect();
        let bytes = encode(&frames, true);
        let mut cursor = 0;
        let mut decoded = Vec::new();
        while cursor < bytes.len() {
            match TrrDecoder.read_record(&bytes[cursor..], cursor as u64).unwrap() {
                Decoded::Complete { value, consumed } => {
                    decoded.push(value);
                    cursor += consumed;
                }
                Decoded::NeedMoreData => panic!("complete buffer reported as partial"),
            }
        }
        assert_eq!(cursor, bytes.len());
        assert_eq!(decoded, frames);
    }

    #[test]
    fn every_proper_prefix_of_a_record_needs_more_data() {
        let bytes = encode(&[frame(7, 2)], false);
        for len in 0..bytes.len() {
            assert_eq!(
                TrrDecoder.read_record(&bytes[..len], 0).unwrap(),
                Decoded::NeedMoreData,
                "prefix of {len} bytes"
            );
        }
        assert!(TrrDecoder.read_record(&bytes, 0).unwrap().is_complete());
    }

    #[test]
    fn single_precision_round_trips_representable_values() {
        let bytes = encode(&[frame(3, 2)], false);
        let frames = TrrDecoder.read_all(&bytes).unwrap();
        assert_eq!(frames[0].positions.as_ref().unwrap()[1], Vector3::new(4.0, 0.5, -1.0));
        assert_eq!(frames[0].time, 1.5);
    }

    #[test]
    fn big_endian_records_are_detected_from_the_magic() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.extend_from_slice(&13i32.to_be_bytes());
        bytes.extend_from_slice(&12i32.to_be_bytes());
        bytes.extend_from_slice(VERSION);
        let ints = [0, 0, 36, 0, 0, 0, 0, 12, 0, 0, 1, 5, 0];
        for v in ints {
            bytes.extend_from_slice(&(v as i32).to_be_bytes());
        }
        bytes.extend_from_slice(&2.0f32.to_be_bytes());
        bytes.extend_from_slice(&0.0f32.to_be_bytes());
        for i in 0..9 {
            bytes.extend_from_slice(&(i as f32).to_be_bytes());
        }
        for x in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&x.to_be_bytes());
        }
        let frames = TrrDecoder.read_all(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].step, 5);
        assert_eq!(frames[0].time, 2.0);
        assert_eq!(frames[0].box_matrix.unwrap()[(1, 0)], 3.0);
        assert_eq!(frames[0].positions.as_ref().unwrap()[0], Vector3::new(1.0, 2.0, 3.0));
        assert!(frames[0].velocities.is_none());
    }

    #[test]
    fn garbage_is_reported_with_its_offset() {
        let mut bytes = encode(&[frame(0, 1)], false);
        let good = bytes.len();
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]);
        match TrrDecoder.read_all(&bytes) {
            Err(TrajectoryError::CorruptStream { offset, .. }) => assert_eq!(offset, good as u64),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_block_sizes_are_corrupt() {
        let mut bytes = encode(&[frame(0, 2)], false);
        // x_size is the eighth integer after the version string.
        let at = 12 + VERSION.len() + 7 * 4;
        bytes[at..at + 4].copy_from_slice(&20i32.to_le_bytes());
        assert!(matches!(
            TrrDecoder.read_header(&bytes, 0),
            Err(TrajectoryError::CorruptStream { offset: 0, .. })
        ));
    }

    #[test]
    fn truncated_file_is_corrupt_when_read_as_finished() {
        let bytes = encode(&[frame(0, 1), frame(1, 1)], false);
        let result = TrrDecoder.read_all(&bytes[..bytes.len() - 3]);
        assert!(matches!(result, Err(TrajectoryError::CorruptStream { .. })));
    }

    #[test]
    fn frames_can_be_read_by_index_and_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        write_trr_file(&path, &[frame(0, 2), frame(1, 2)], false).unwrap();
        append_trr_frame(&path, &frame(2, 2), false).unwrap();

        assert_eq!(read_trr_file(&path).unwrap().len(), 3);
        assert_eq!(read_trr_frame(&path, 2).unwrap().step, 2);
        assert!(matches!(
            read_trr_frame(&path, 3),
            Err(TrajectoryError::FrameNotFound { index: 3, .. })
        ));
    }

    #[test]
    fn headers_are_listed_without_decoding_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        write_trr_file(&path, &[frame(0, 3), frame(4, 3)], true).unwrap();

        let headers = read_trr_headers(&path).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].step, 4);
        assert_eq!(headers[1].natoms, 3);
        assert_eq!(headers[0].precision(), 8);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(matches!(
            read_trr_headers(&path),
            Err(TrajectoryError::CorruptStream { .. })
        ));
    }

    #[test]
    fn snapshot_conversion_drops_an_all_zero_box() {
        let snapshot = Snapshot::new(vec![Vector3::new(1.0, 2.0, 3.0)], vec![]);
        let frame = TrrFrame::from_snapshot(&snapshot, 0, 0.0);
        assert_eq!(frame.box_matrix, Some(Matrix3::zeros()));
        assert_eq!(frame.to_snapshot(), snapshot);
    }
}
