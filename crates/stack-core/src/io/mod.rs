//! Loader/writer collaborators: FITS-like ingress/egress plus
//! PNG/TIFF side-channel output for human inspection.

pub mod fits;
pub mod image_io;
