#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use wpical_camera as camera;

#[doc(inline)]
pub use wpical_field as field;

#[doc(inline)]
pub use wpical_io as io;

#[doc(inline)]
pub use wpical_layout as layout;

#[doc(inline)]
pub use wpical_optim as optim;

#[doc(inline)]
pub use wpical_pnp as pnp;
