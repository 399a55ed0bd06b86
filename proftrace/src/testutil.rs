//! Synthetic trace streams for tests.

use prof_format::{
    build_block_record, build_cswitch_record, build_descriptor_record, build_value_record,
    io as wire, write_header, BlockKind, TraceHeader, CURRENT_VERSION, SIGNATURE, V_1_0_0,
    V_1_3_0, V_2_0_0,
};

#[derive(Default)]
struct ThreadSection {
    id: u64,
    name: String,
    cswitches: Vec<Vec<u8>>,
    blocks: Vec<Vec<u8>>,
}

/// Builds a complete binary stream record by record, computing the
/// header's sizes and counts from what was added.
pub struct StreamBuilder {
    version: u32,
    pid: u64,
    cpu_frequency: i64,
    begin_time: u64,
    end_time: u64,
    descriptors: Vec<Option<Vec<u8>>>,
    threads: Vec<ThreadSection>,
    declared_memory: Option<u64>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        StreamBuilder {
            version: CURRENT_VERSION,
            pid: 1000,
            cpu_frequency: 0,
            begin_time: 0,
            end_time: 1_000_000,
            descriptors: Vec::new(),
            threads: Vec::new(),
            declared_memory: None,
        }
    }

    /// Overrides the header's memory size instead of computing it.
    pub fn declared_memory(mut self, bytes: u64) -> Self {
        self.declared_memory = Some(bytes);
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn times(mut self, begin: u64, end: u64) -> Self {
        self.begin_time = begin;
        self.end_time = end;
        self
    }

    pub fn frequency(mut self, cpu_frequency: i64) -> Self {
        self.cpu_frequency = cpu_frequency;
        self
    }

    /// Registers a descriptor and returns its id.
    pub fn descriptor(mut self, kind: BlockKind, name: &str) -> Self {
        let id = self.descriptors.len() as u32;
        self.descriptors.push(Some(build_descriptor_record(
            id,
            1,
            0,
            kind,
            name,
            "test.rs",
        )));
        self
    }

    pub fn null_descriptor(mut self) -> Self {
        self.descriptors.push(None);
        self
    }

    /// Appends arbitrary descriptor payload bytes, framing included.
    pub fn raw_descriptor(mut self, payload: Vec<u8>) -> Self {
        self.descriptors.push(Some(payload));
        self
    }

    /// Opens a new thread section; records go to the most recent one.
    pub fn thread(mut self, id: u64, name: &str) -> Self {
        self.threads.push(ThreadSection {
            id,
            name: name.to_owned(),
            ..ThreadSection::default()
        });
        self
    }

    fn section(&mut self) -> &mut ThreadSection {
        self.threads.last_mut().expect("no thread section opened")
    }

    pub fn block(mut self, begin: u64, end: u64, id: u32, name: &str) -> Self {
        let record = build_block_record(begin, end, id, name);
        self.section().blocks.push(record);
        self
    }

    pub fn value(mut self, timestamp: u64, id: u32, data: &[u8]) -> Self {
        let record = build_value_record(timestamp, id, data);
        self.section().blocks.push(record);
        self
    }

    /// Appends arbitrary block record bytes as-is.
    pub fn raw_block(mut self, record: Vec<u8>) -> Self {
        self.section().blocks.push(record);
        self
    }

    pub fn cswitch(mut self, begin: u64, end: u64, name: &str) -> Self {
        let record = build_cswitch_record(begin, end, name);
        self.section().cswitches.push(record);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let memory_size: u64 = self.declared_memory.unwrap_or_else(|| {
            self.threads
                .iter()
                .flat_map(|t| t.cswitches.iter().chain(t.blocks.iter()))
                .map(|r| r.len() as u64)
                .sum()
        });
        let blocks_count: u32 = self
            .threads
            .iter()
            .map(|t| (t.cswitches.len() + t.blocks.len()) as u32)
            .sum();
        let descriptors_memory_size: u64 = self
            .descriptors
            .iter()
            .flatten()
            .map(|d| d.len() as u64)
            .sum();

        let mut buf = Vec::new();
        if self.version < V_2_0_0 {
            buf.extend_from_slice(&SIGNATURE.to_le_bytes());
            buf.extend_from_slice(&self.version.to_le_bytes());
            if self.version > V_1_0_0 {
                if self.version < V_1_3_0 {
                    buf.extend_from_slice(&(self.pid as u32).to_le_bytes());
                } else {
                    buf.extend_from_slice(&self.pid.to_le_bytes());
                }
            }
            buf.extend_from_slice(&self.cpu_frequency.to_le_bytes());
            buf.extend_from_slice(&self.begin_time.to_le_bytes());
            buf.extend_from_slice(&self.end_time.to_le_bytes());
            buf.extend_from_slice(&blocks_count.to_le_bytes());
            buf.extend_from_slice(&memory_size.to_le_bytes());
            buf.extend_from_slice(&(self.descriptors.len() as u32).to_le_bytes());
            buf.extend_from_slice(&descriptors_memory_size.to_le_bytes());
        } else {
            write_header(
                &mut buf,
                &TraceHeader {
                    version: self.version,
                    pid: self.pid,
                    cpu_frequency: self.cpu_frequency,
                    begin_time: self.begin_time,
                    end_time: self.end_time,
                    memory_size,
                    descriptors_memory_size,
                    blocks_count,
                    descriptors_count: self.descriptors.len() as u32,
                },
            )
            .expect("writing to a Vec cannot fail");
        }

        for descriptor in &self.descriptors {
            match descriptor {
                Some(payload) => {
                    wire::write_u16(&mut buf, payload.len() as u16).unwrap();
                    buf.extend_from_slice(payload);
                }
                None => wire::write_u16(&mut buf, 0).unwrap(),
            }
        }

        let tid_size = prof_format::thread_id_size(self.version);
        for thread in &self.threads {
            buf.extend_from_slice(&thread.id.to_le_bytes()[..tid_size]);
            if thread.name.is_empty() {
                wire::write_u16(&mut buf, 0).unwrap();
            } else {
                wire::write_u16(&mut buf, thread.name.len() as u16 + 1).unwrap();
                buf.extend_from_slice(thread.name.as_bytes());
                buf.push(0);
            }
            wire::write_u32(&mut buf, thread.cswitches.len() as u32).unwrap();
            for record in &thread.cswitches {
                wire::write_u16(&mut buf, record.len() as u16).unwrap();
                buf.extend_from_slice(record);
            }
            wire::write_u32(&mut buf, thread.blocks.len() as u32).unwrap();
            for record in &thread.blocks {
                wire::write_u16(&mut buf, record.len() as u16).unwrap();
                buf.extend_from_slice(record);
            }
        }

        buf
    }

    /// Builds the standalone descriptors-only stream layout.
    pub fn build_descriptors_only(self) -> Vec<u8> {
        let descriptors_memory_size: u64 = self
            .descriptors
            .iter()
            .flatten()
            .map(|d| d.len() as u64)
            .sum();

        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        wire::write_u32(&mut buf, self.descriptors.len() as u32).unwrap();
        wire::write_u64(&mut buf, descriptors_memory_size).unwrap();
        for descriptor in &self.descriptors {
            match descriptor {
                Some(payload) => {
                    wire::write_u16(&mut buf, payload.len() as u16).unwrap();
                    buf.extend_from_slice(payload);
                }
                None => wire::write_u16(&mut buf, 0).unwrap(),
            }
        }
        buf
    }
}
