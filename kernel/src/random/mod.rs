//! random provides a cryptographically secure pseudo-random number generator (CSPRNG).
//!
//! The design is directly inspired by Fuchsia's CPRNG: an entropy pool is mixed
//! using SHA-256 and drawn from using ChaCha20 as a stream cipher. See
//! [`csprng`] for the algorithm itself.
//!
//! At least one entropy source must be registered with [`register_entropy_source`]
//! before calling [`init`]. The RDRAND instruction, if the CPU supports it, is
//! registered automatically.

mod csprng;
mod rdrand;

use alloc::boxed::Box;
use alloc::vec::Vec;

/// CSPRNG is the kernel's cryptographically secure pseudo-random number generator.
///
/// CSPRNG must be seeded by at least one source of entropy before use. The kernel
/// will panic if read is called before CSPRNG has been seeded.
///
static CSPRNG: spin::Mutex<csprng::Csprng> = spin::Mutex::new(csprng::Csprng::new());

/// read fills the given buffer with random data.
///
/// read will panic if the CSPRNG has not been seeded by registering at least one
/// entropy source, then calling init.
///
pub fn read(buf: &mut [u8]) {
    CSPRNG.lock().read(buf);
}

/// EntropySource is a trait we use to simplify the process of collecting sources
/// of entropy.
///
pub trait EntropySource: Send {
    /// get_entropy fills the given buffer with entropy.
    ///
    fn get_entropy(&mut self, buf: &mut [u8; 32]);
}

/// ENTROPY_SOURCES is our set of entropy sources, supplied using register_entropy_source.
///
static ENTROPY_SOURCES: spin::Mutex<Vec<Box<dyn EntropySource>>> = spin::Mutex::new(Vec::new());

/// register_entropy_source is used to provide an ongoing source of entropy to the
/// kernel for use in seeding the CSPRNG.
///
pub fn register_entropy_source(src: Box<dyn EntropySource>) {
    ENTROPY_SOURCES.lock().push(src);
}

/// init initialises the CSPRNG using the entropy sources that have been registered.
///
/// # Panics
///
/// init panics if no sources of entropy are available.
///
pub fn init() {
    rdrand::init();

    let mut csprng = CSPRNG.lock();
    let mut sources = ENTROPY_SOURCES.lock();
    if sources.is_empty() {
        panic!("random::init called without any entropy sources registered");
    }

    let mut buf = [0u8; 32];
    for source in sources.iter_mut() {
        source.get_entropy(&mut buf);
        csprng.seed(&buf);
    }
}

/// reseed mixes fresh entropy from every registered source into the pool.
///
/// Callers that have a periodic timer available should invoke this
/// occasionally (Fuchsia's equivalent re-seeds every 30 seconds); this
/// kernel does not yet schedule that automatically.
///
/// # Panics
///
/// reseed panics if every entropy source has since been removed.
///
pub fn reseed() {
    let mut buf = [0u8; 32];
    let mut csprng = CSPRNG.lock();
    let mut sources = ENTROPY_SOURCES.lock();
    if sources.is_empty() {
        panic!("all entropy sources removed");
    }

    for source in sources.iter_mut() {
        source.get_entropy(&mut buf);
        csprng.seed(&buf);
    }
}
