pub mod sequence_buffer;
