//! Dump source I/O.

mod dump_file;

pub use dump_file::DumpFile;
