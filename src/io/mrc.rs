//! Minimal MRC2014 reader/writer: enough header handling to learn an
//! image's shape and pixel spacing without touching the voxel data, plus
//! full reads and crop writes in the common data modes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::ExtractError;
use crate::extract::transforms::OutputDtype;
use crate::extract::volume::Volume;

const HEADER_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MrcHeader {
    pub nx: i32,
    pub ny: i32,
    pub nz: i32,
    pub mode: i32,
    pub mx: i32,
    pub my: i32,
    pub mz: i32,
    /// Cell dimensions in Angstrom.
    pub cella: [f32; 3],
    pub nsymbt: i32,
}

impl MrcHeader {
    pub fn shape(&self) -> [usize; 3] {
        [self.nx as usize, self.ny as usize, self.nz as usize]
    }

    /// Pixel spacing in Angstrom per axis-0 sample; 0 when the header
    /// carries no sampling information.
    pub fn pixel_size(&self) -> f64 {
        if self.mx > 0 {
            (self.cella[0] / self.mx as f32) as f64
        } else {
            0.0
        }
    }
}

fn bad<P: AsRef<Path>>(path: P, reason: &str) -> ExtractError {
    ExtractError::Mrc {
        path: format!("{:?}", path.as_ref()),
        reason: reason.to_string(),
    }
}

/// Reads only the fixed 1024-byte header.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<MrcHeader, ExtractError> {
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);
    read_header_from(&mut reader, &path)
}

fn read_header_from<R: Read, P: AsRef<Path>>(
    reader: &mut R,
    path: P,
) -> Result<MrcHeader, ExtractError> {
    let nx = reader.read_i32::<LittleEndian>()?;
    let ny = reader.read_i32::<LittleEndian>()?;
    let nz = reader.read_i32::<LittleEndian>()?;
    let mode = reader.read_i32::<LittleEndian>()?;
    // nxstart, nystart, nzstart
    for _ in 0..3 {
        reader.read_i32::<LittleEndian>()?;
    }
    let mx = reader.read_i32::<LittleEndian>()?;
    let my = reader.read_i32::<LittleEndian>()?;
    let mz = reader.read_i32::<LittleEndian>()?;
    let mut cella = [0f32; 3];
    for c in cella.iter_mut() {
        *c = reader.read_f32::<LittleEndian>()?;
    }
    // cellb, mapc/mapr/maps, dmin/dmax/dmean, ispg: words 14..23
    for _ in 0..10 {
        reader.read_f32::<LittleEndian>()?;
    }
    let nsymbt = reader.read_i32::<LittleEndian>()?;

    if nx <= 0 || ny <= 0 || nz <= 0 {
        return Err(bad(&path, "non-positive dimensions"));
    }
    if nsymbt < 0 {
        return Err(bad(&path, "negative extended header size"));
    }

    Ok(MrcHeader {
        nx,
        ny,
        nz,
        mode,
        mx,
        my,
        mz,
        cella,
        nsymbt,
    })
}

/// Reads the full volume, converting the stored mode to f32. Supported
/// modes: 0 (i8), 1 (i16), 2 (f32), 6 (u16).
pub fn read<P: AsRef<Path>>(path: P) -> Result<(Volume, MrcHeader), ExtractError> {
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);
    let header = read_header_from(&mut reader, &path)?;
    reader.seek(SeekFrom::Start(HEADER_BYTES + header.nsymbt as u64))?;

    let n = (header.nx as usize) * (header.ny as usize) * (header.nz as usize);
    let mut data = Vec::with_capacity(n);
    match header.mode {
        0 => {
            let mut buf = vec![0u8; n];
            reader.read_exact(&mut buf)?;
            data.extend(buf.iter().map(|&b| b as i8 as f32));
        }
        1 => {
            for _ in 0..n {
                data.push(reader.read_i16::<LittleEndian>()? as f32);
            }
        }
        2 => {
            for _ in 0..n {
                data.push(reader.read_f32::<LittleEndian>()?);
            }
        }
        6 => {
            for _ in 0..n {
                data.push(reader.read_u16::<LittleEndian>()? as f32);
            }
        }
        other => {
            return Err(bad(&path, &format!("unsupported data mode {}", other)));
        }
    }

    Ok((
        Volume {
            data,
            shape: header.shape(),
        },
        header,
    ))
}

/// Writes a volume with explicit pixel spacing (Angstrom). The output
/// mode follows `dtype`; values are clamped into the integer range when
/// an integer mode is requested.
pub fn write<P: AsRef<Path>>(
    path: P,
    volume: &Volume,
    pixel_size: f64,
    dtype: OutputDtype,
) -> Result<(), ExtractError> {
    let file = File::create(&path)?;
    let mut writer = BufWriter::new(file);

    let [nx, ny, nz] = volume.shape;
    let mode = match dtype {
        OutputDtype::I8 => 0i32,
        OutputDtype::I16 => 1i32,
        OutputDtype::F32 => 2i32,
    };

    let (dmin, dmax) = volume
        .data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let dmean = volume.mean() as f32;
    let rms = volume.std() as f32;

    writer.write_i32::<LittleEndian>(nx as i32)?;
    writer.write_i32::<LittleEndian>(ny as i32)?;
    writer.write_i32::<LittleEndian>(nz as i32)?;
    writer.write_i32::<LittleEndian>(mode)?;
    for _ in 0..3 {
        writer.write_i32::<LittleEndian>(0)?; // nxstart..nzstart
    }
    writer.write_i32::<LittleEndian>(nx as i32)?;
    writer.write_i32::<LittleEndian>(ny as i32)?;
    writer.write_i32::<LittleEndian>(nz as i32)?;
    for &n in &[nx, ny, nz] {
        writer.write_f32::<LittleEndian>((n as f64 * pixel_size) as f32)?;
    }
    for _ in 0..3 {
        writer.write_f32::<LittleEndian>(90.0)?; // cellb
    }
    writer.write_i32::<LittleEndian>(1)?; // mapc
    writer.write_i32::<LittleEndian>(2)?; // mapr
    writer.write_i32::<LittleEndian>(3)?; // maps
    writer.write_f32::<LittleEndian>(dmin)?;
    writer.write_f32::<LittleEndian>(dmax)?;
    writer.write_f32::<LittleEndian>(dmean)?;
    writer.write_i32::<LittleEndian>(1)?; // ispg, volume
    writer.write_i32::<LittleEndian>(0)?; // nsymbt
    for _ in 0..25 {
        writer.write_i32::<LittleEndian>(0)?; // extra
    }
    for _ in 0..3 {
        writer.write_f32::<LittleEndian>(0.0)?; // origin
    }
    writer.write_all(b"MAP ")?;
    writer.write_all(&[0x44, 0x44, 0x00, 0x00])?; // machst, little endian
    writer.write_f32::<LittleEndian>(rms)?;
    writer.write_i32::<LittleEndian>(0)?; // nlabl
    writer.write_all(&[0u8; 800])?; // labels

    match dtype {
        OutputDtype::I8 => {
            for &v in &volume.data {
                writer.write_i8(v.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8)?;
            }
        }
        OutputDtype::I16 => {
            for &v in &volume.data {
                writer
                    .write_i16::<LittleEndian>(v.round().clamp(i16::MIN as f32, i16::MAX as f32)
                        as i16)?;
            }
        }
        OutputDtype::F32 => {
            for &v in &volume.data {
                writer.write_f32::<LittleEndian>(v)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod mrc_tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("tomocrop_mrc_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_write_read_roundtrip_f32() {
        let path = tmp_path("roundtrip_f32.mrc");
        let volume = Volume {
            data: (0..24).map(|i| i as f32 * 0.5 - 3.0).collect(),
            shape: [2, 3, 4],
        };
        write(&path, &volume, 13.4, OutputDtype::F32).unwrap();

        let (back, header) = read(&path).unwrap();
        assert_eq!(back.shape, [2, 3, 4]);
        assert_eq!(header.mode, 2);
        assert_relative_eq!(header.pixel_size(), 13.4, epsilon = 1e-4);
        for (a, b) in volume.data.iter().zip(&back.data) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_read_roundtrip_i16() {
        let path = tmp_path("roundtrip_i16.mrc");
        let volume = Volume {
            data: vec![-7.0, 0.0, 3.0, 40000.0, 2.4, 2.6, 1.0, -1.0],
            shape: [2, 2, 2],
        };
        write(&path, &volume, 1.0, OutputDtype::I16).unwrap();

        let (back, header) = read(&path).unwrap();
        assert_eq!(header.mode, 1);
        assert_eq!(back.data[0], -7.0);
        assert_eq!(back.data[3], i16::MAX as f32); // clamped
        assert_eq!(back.data[4], 2.0); // rounded
        assert_eq!(back.data[5], 3.0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_header_only_read() {
        let path = tmp_path("header_only.mrc");
        let volume = Volume {
            data: vec![0.0; 6 * 5 * 4],
            shape: [6, 5, 4],
        };
        write(&path, &volume, 2.0, OutputDtype::F32).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.shape(), [6, 5, 4]);
        assert_relative_eq!(header.pixel_size(), 2.0, epsilon = 1e-5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let path = tmp_path("truncated.mrc");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(read_header(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
