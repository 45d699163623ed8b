/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
///
/// The kernel state is made of fixed-size arrays built from `INIT` values,
/// so nothing in it ever needs a constructor that runs at boot time.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl Init for &'_ str {
    const INIT: Self = "";
}

impl Init for bool {
    const INIT: Self = false;
}

macro_rules! impl_init_for_int {
    ($($ty:ty),*) => {$(
        impl Init for $ty {
            const INIT: Self = 0;
        }
    )*};
}

impl_init_for_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
