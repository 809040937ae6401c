pub mod trace_frame;
pub mod trace_stream;
