//! A plain length-delimited binary stream of trace frames. This is the
//! interface the core needs from a trace serializer; the production
//! format (compression, indexing) is a collaborator layered behind the
//! same read/write surface.

use crate::trace::trace_frame::{EntryRegs, Event, FrameTime, MemWrite, TraceFrame};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const EVENTS_FILE: &str = "events.bin";
const MAGIC: &[u8; 8] = b"retrace\0";

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a retrace trace (bad magic)")]
    BadMagic,
    #[error("malformed frame (kind {0})")]
    BadFrame(u8),
    #[error("unexpected end of trace")]
    UnexpectedEof,
}

pub type TraceResult<T> = Result<T, TraceError>;

/// What replay needs to respawn the recorded process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TraceHeader {
    pub exe: String,
    pub args: Vec<String>,
    pub bind_to_cpu: i32,
}

pub struct TraceWriter {
    file: BufWriter<File>,
    time: FrameTime,
}

impl TraceWriter {
    pub fn create(dir: &Path, header: &TraceHeader) -> TraceResult<TraceWriter> {
        create_dir_all(dir)?;
        let file = File::create(dir.join(EVENTS_FILE))?;
        let mut this = TraceWriter {
            file: BufWriter::new(file),
            time: 0,
        };
        this.file.write_all(MAGIC)?;
        this.write_string(&header.exe)?;
        this.write_u32(header.args.len() as u32)?;
        for arg in &header.args {
            this.write_string(arg)?;
        }
        this.write_u32(header.bind_to_cpu as u32)?;
        Ok(this)
    }

    /// The time the next written frame will carry.
    pub fn time(&self) -> FrameTime {
        self.time
    }

    pub fn write_frame(&mut self, tid: libc::pid_t, event: &Event) -> TraceResult<FrameTime> {
        let time = self.time;
        self.time += 1;
        self.write_u64(time)?;
        self.write_u32(tid as u32)?;
        self.file.write_all(&[event.kind()])?;
        match event {
            Event::Syscall {
                entry_regs,
                ret,
                mem_writes,
            } => {
                self.write_entry_regs(entry_regs)?;
                self.write_u64(*ret as u64)?;
                self.write_u32(mem_writes.len() as u32)?;
                for w in mem_writes {
                    self.write_u64(w.addr)?;
                    self.write_bytes(&w.bytes)?;
                }
            }
            Event::SyscallbufFlush { bytes } => self.write_bytes(bytes)?,
            Event::Signal { signo } => self.write_u32(*signo as u32)?,
            Event::Exit { wait_status } => self.write_u32(*wait_status as u32)?,
            Event::SyscallbufAbortCommit
            | Event::SyscallbufReset
            | Event::Desched
            | Event::Sched
            | Event::TraceTermination => (),
        }
        Ok(time)
    }

    pub fn close(mut self) -> TraceResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn write_u32(&mut self, v: u32) -> TraceResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64(&mut self, v: u64) -> TraceResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> TraceResult<()> {
        self.write_u32(bytes.len() as u32)?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> TraceResult<()> {
        self.write_bytes(s.as_bytes())
    }

    fn write_entry_regs(&mut self, regs: &EntryRegs) -> TraceResult<()> {
        self.write_u64(regs.ip)?;
        self.write_u64(regs.sp)?;
        self.write_u64(regs.syscallno as u64)?;
        for arg in &regs.args {
            self.write_u64(*arg)?;
        }
        Ok(())
    }
}

pub struct TraceReader {
    file: BufReader<File>,
    header: TraceHeader,
    time: FrameTime,
}

impl TraceReader {
    pub fn open(dir: &Path) -> TraceResult<TraceReader> {
        let file = File::open(PathBuf::from(dir).join(EVENTS_FILE))?;
        let mut this = TraceReader {
            file: BufReader::new(file),
            header: TraceHeader::default(),
            time: 0,
        };
        let mut magic = [0u8; 8];
        this.file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(TraceError::BadMagic);
        }
        let exe = this.read_string()?;
        let nargs = this.read_u32()?;
        let mut args = Vec::with_capacity(nargs as usize);
        for _ in 0..nargs {
            args.push(this.read_string()?);
        }
        let bind_to_cpu = this.read_u32()? as i32;
        this.header = TraceHeader {
            exe,
            args,
            bind_to_cpu,
        };
        Ok(this)
    }

    pub fn header(&self) -> &TraceHeader {
        &self.header
    }

    /// The time of the most recently read frame.
    pub fn time(&self) -> FrameTime {
        self.time
    }

    /// Next frame, or None at a clean end of stream.
    pub fn read_frame(&mut self) -> TraceResult<Option<TraceFrame>> {
        let mut time_buf = [0u8; 8];
        match self.file.read_exact(&mut time_buf) {
            Ok(()) => (),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let time = u64::from_le_bytes(time_buf);
        let tid = self.read_u32()? as libc::pid_t;
        let mut kind = [0u8; 1];
        self.file.read_exact(&mut kind)?;
        let event = match kind[0] {
            1 => {
                let entry_regs = self.read_entry_regs()?;
                let ret = self.read_u64()? as i64;
                let nwrites = self.read_u32()?;
                let mut mem_writes = Vec::with_capacity(nwrites as usize);
                for _ in 0..nwrites {
                    let addr = self.read_u64()?;
                    let bytes = self.read_bytes()?;
                    mem_writes.push(MemWrite { addr, bytes });
                }
                Event::Syscall {
                    entry_regs,
                    ret,
                    mem_writes,
                }
            }
            2 => Event::SyscallbufFlush {
                bytes: self.read_bytes()?,
            },
            3 => Event::SyscallbufAbortCommit,
            4 => Event::SyscallbufReset,
            5 => Event::Desched,
            6 => Event::Signal {
                signo: self.read_u32()? as i32,
            },
            7 => Event::Sched,
            8 => Event::Exit {
                wait_status: self.read_u32()? as i32,
            },
            9 => Event::TraceTermination,
            k => return Err(TraceError::BadFrame(k)),
        };
        self.time = time;
        Ok(Some(TraceFrame { time, tid, event }))
    }

    fn read_u32(&mut self) -> TraceResult<u32> {
        let mut buf = [0u8; 4];
        self.file.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> TraceResult<u64> {
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self) -> TraceResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_string(&mut self) -> TraceResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| TraceError::BadMagic)
    }

    fn read_entry_regs(&mut self) -> TraceResult<EntryRegs> {
        let ip = self.read_u64()?;
        let sp = self.read_u64()?;
        let syscallno = self.read_u64()? as i64;
        let mut args = [0u64; 6];
        for arg in &mut args {
            *arg = self.read_u64()?;
        }
        Ok(EntryRegs {
            ip,
            sp,
            syscallno,
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("retrace-test-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn sample_frames() -> Vec<(libc::pid_t, Event)> {
        vec![
            (
                100,
                Event::Syscall {
                    entry_regs: EntryRegs {
                        ip: 0x8048000,
                        sp: 0xbf000000,
                        syscallno: 4,
                        args: [1, 0x1234, 16, 0, 0, 0],
                    },
                    ret: 16,
                    mem_writes: vec![MemWrite {
                        addr: 0x1234,
                        bytes: vec![1, 2, 3],
                    }],
                },
            ),
            (
                100,
                Event::SyscallbufFlush {
                    bytes: vec![9; 48],
                },
            ),
            (100, Event::SyscallbufAbortCommit),
            (101, Event::Desched),
            (100, Event::SyscallbufReset),
            (101, Event::Signal { signo: libc::SIGIO }),
            (100, Event::Sched),
            (100, Event::Exit { wait_status: 0 }),
            (100, Event::TraceTermination),
        ]
    }

    #[test]
    fn round_trip() {
        let dir = scratch_dir("round-trip");
        let header = TraceHeader {
            exe: "/bin/true".into(),
            args: vec!["true".into(), "--version".into()],
            bind_to_cpu: 0,
        };
        let mut writer = TraceWriter::create(&dir, &header).unwrap();
        for (tid, event) in sample_frames() {
            writer.write_frame(tid, &event).unwrap();
        }
        writer.close().unwrap();

        let mut reader = TraceReader::open(&dir).unwrap();
        assert_eq!(&header, reader.header());
        for (i, (tid, event)) in sample_frames().into_iter().enumerate() {
            let frame = reader.read_frame().unwrap().unwrap();
            assert_eq!(i as FrameTime, frame.time);
            assert_eq!(tid, frame.tid);
            assert_eq!(event, frame.event);
        }
        assert!(reader.read_frame().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn flush_payload_is_byte_identical() {
        let dir = scratch_dir("flush-bytes");
        let mut writer = TraceWriter::create(&dir, &TraceHeader::default()).unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        writer
            .write_frame(
                1,
                &Event::SyscallbufFlush {
                    bytes: payload.clone(),
                },
            )
            .unwrap();
        writer.close().unwrap();

        let mut reader = TraceReader::open(&dir).unwrap();
        match reader.read_frame().unwrap().unwrap().event {
            Event::SyscallbufFlush { bytes } => assert_eq!(payload, bytes),
            other => panic!("wrong event {:?}", other),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn frame_times_advance_monotonically() {
        let dir = scratch_dir("times");
        let mut writer = TraceWriter::create(&dir, &TraceHeader::default()).unwrap();
        assert_eq!(0, writer.write_frame(1, &Event::Sched).unwrap());
        assert_eq!(1, writer.write_frame(1, &Event::Sched).unwrap());
        assert_eq!(2, writer.time());
        writer.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn opening_garbage_fails_cleanly() {
        let dir = scratch_dir("garbage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(EVENTS_FILE), b"not a trace").unwrap();
        match TraceReader::open(&dir) {
            Err(TraceError::BadMagic) | Err(TraceError::Io(_)) => (),
            other => panic!("expected failure, got {:?}", other.map(|_| ())),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
