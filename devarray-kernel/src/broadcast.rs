//! Lazy broadcast expressions.

use std::fmt;
use std::marker::PhantomData;

use smallvec::{smallvec, SmallVec};

use devarray_traits::{BackendHandle, DeviceError, Result};
use devarray_view::layout::{total_len, Dims};
use devarray_view::{common_backend, Classify, IndexStyle, Residency};

use crate::operand::{Access, Operand, Position};

/// An ordered tuple of broadcast operands.
pub trait Operands {
    type Accesses: AccessTuple;

    /// Every operand, for residency and shape checks.
    fn classified(&self) -> SmallVec<[&dyn Classify; 4]>;

    /// Readers aligned to a launch of shape `dest_dims`.
    fn accesses(&self, dest_dims: &[usize]) -> Result<Self::Accesses>;

    /// Readers over each operand's own elements.
    fn flat_accesses(&self) -> Result<Self::Accesses>;
}

/// The lowered readers of an operand tuple.
pub trait AccessTuple: Sync {
    /// Style the readers need together.
    fn index_style(&self) -> IndexStyle;

    /// Whether every reader addresses by flat index.
    #[inline]
    fn all_linear(&self) -> bool {
        self.index_style() == IndexStyle::Linear
    }
}

/// Calling an element function with one value read from each operand.
pub trait Apply<F, R>: AccessTuple {
    /// # Safety
    ///
    /// Same contract as [`Access::load`] for every reader.
    unsafe fn apply(&self, f: &F, pos: &Position<'_>) -> R;

    /// # Safety
    ///
    /// Same contract as [`Access::load_flat`] for every reader.
    unsafe fn apply_flat(&self, f: &F, i: usize) -> R;
}

macro_rules! impl_operand_tuple {
    ($($T:ident $i:tt),+) => {
        impl<$($T: Operand),+> Operands for ($($T,)+) {
            type Accesses = ($($T::Access,)+);

            fn classified(&self) -> SmallVec<[&dyn Classify; 4]> {
                smallvec![$(&self.$i as &dyn Classify),+]
            }

            fn accesses(&self, dest_dims: &[usize]) -> Result<Self::Accesses> {
                Ok(($(self.$i.access(dest_dims)?,)+))
            }

            fn flat_accesses(&self) -> Result<Self::Accesses> {
                Ok(($(self.$i.flat_access()?,)+))
            }
        }

        impl<$($T: Access),+> AccessTuple for ($($T,)+) {
            #[inline]
            fn index_style(&self) -> IndexStyle {
                IndexStyle::Linear $(.combine(self.$i.index_style()))+
            }
        }

        impl<F, R, $($T: Access),+> Apply<F, R> for ($($T,)+)
        where
            F: Fn($($T::Item),+) -> R,
        {
            #[inline]
            unsafe fn apply(&self, f: &F, pos: &Position<'_>) -> R {
                unsafe { f($(self.$i.load(pos)),+) }
            }

            #[inline]
            unsafe fn apply_flat(&self, f: &F, i: usize) -> R {
                unsafe { f($(self.$i.load_flat(i)),+) }
            }
        }
    };
}

impl_operand_tuple!(A 0);
impl_operand_tuple!(A 0, B 1);
impl_operand_tuple!(A 0, B 1, C 2);
impl_operand_tuple!(A 0, B 1, C 2, D 3);
impl_operand_tuple!(A 0, B 1, C 2, D 3, E 4);
impl_operand_tuple!(A 0, B 1, C 2, D 3, E 4, G 5);

/// Shape of a broadcast over operands of shapes `shapes`.
///
/// Per dimension, extent-1 operands stretch to the extent of the others.
/// Missing trailing dimensions count as extent 1.
pub fn broadcast_shape<'a, I>(shapes: I) -> Result<Dims>
where
    I: IntoIterator<Item = &'a [usize]>,
{
    let mut out = Dims::new();
    for shape in shapes {
        if shape.len() > out.len() {
            out.resize(shape.len(), 1);
        }
        for (d, &extent) in shape.iter().enumerate() {
            let current = out[d];
            if current == 1 {
                out[d] = extent;
            } else if extent != 1 && extent != current {
                return Err(DeviceError::ShapeMismatch {
                    expected: out.to_vec(),
                    got: shape.to_vec(),
                });
            }
        }
    }
    Ok(out)
}

/// An element function applied lazily over a tuple of operands.
///
/// Built by [`broadcasted`]; evaluated by
/// [`evaluate_to_new`](crate::evaluate_to_new) or
/// [`evaluate_into`](crate::evaluate_into). A `Broadcasted` is itself an
/// operand, so nested expressions fuse into one kernel.
pub struct Broadcasted<F, Args, R> {
    f: F,
    args: Args,
    dims: Dims,
    backend: BackendHandle,
    _output: PhantomData<fn() -> R>,
}

/// Build a broadcast of `f` over `args`.
///
/// Resolves the common backend of the operands and the broadcast shape.
/// No device work happens until the expression is evaluated.
pub fn broadcasted<F, Args, R>(f: F, args: Args) -> Result<Broadcasted<F, Args, R>>
where
    Args: Operands,
    Args::Accesses: Apply<F, R>,
{
    let (backend, dims) = {
        let operands = args.classified();
        let backend = common_backend(&operands)?;
        let dims = broadcast_shape(operands.iter().map(|o| o.residency().dims()))?;
        (backend, dims)
    };
    Ok(Broadcasted::from_parts(f, args, dims, backend))
}

impl<F, Args, R> Broadcasted<F, Args, R> {
    /// Expression with a shape and backend already known to be valid.
    pub(crate) fn from_parts(f: F, args: Args, dims: Dims, backend: BackendHandle) -> Self {
        Self {
            f,
            args,
            dims,
            backend,
            _output: PhantomData,
        }
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        total_len(&self.dims)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    #[inline]
    pub fn func(&self) -> &F {
        &self.f
    }

    #[inline]
    pub fn args(&self) -> &Args {
        &self.args
    }
}

impl<F, Args, R> fmt::Debug for Broadcasted<F, Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcasted")
            .field("dims", &self.dims)
            .field("backend", &self.backend.id())
            .finish_non_exhaustive()
    }
}

impl<F, Args, R> Classify for Broadcasted<F, Args, R> {
    fn residency(&self) -> Residency<'_> {
        Residency::Device {
            backend: &self.backend,
            dims: &self.dims,
        }
    }
}

/// Reader evaluating a nested expression in place.
pub struct BroadcastAccess<F, Acc, R> {
    f: *const F,
    accesses: Acc,
    dims: Dims,
    _output: PhantomData<fn() -> R>,
}

// SAFETY: `f` points at a `Sync` function owned by the expression, which
// outlives every reader lowered from it.
unsafe impl<F: Sync, Acc: Sync, R> Send for BroadcastAccess<F, Acc, R> {}
unsafe impl<F: Sync, Acc: Sync, R> Sync for BroadcastAccess<F, Acc, R> {}

impl<F, Acc, R> Access for BroadcastAccess<F, Acc, R>
where
    F: Sync,
    Acc: Apply<F, R>,
{
    type Item = R;

    #[inline]
    fn index_style(&self) -> IndexStyle {
        self.accesses.index_style()
    }

    #[inline]
    unsafe fn load(&self, pos: &Position<'_>) -> R {
        unsafe { self.accesses.apply(&*self.f, pos) }
    }

    unsafe fn load_flat(&self, i: usize) -> R {
        if self.accesses.all_linear() {
            let pos = Position {
                linear: i,
                coords: &[],
            };
            return unsafe { self.accesses.apply(&*self.f, &pos) };
        }
        let mut coords: SmallVec<[usize; 4]> = smallvec![0; self.dims.len()];
        let mut rest = i;
        for (c, &d) in coords.iter_mut().zip(self.dims.iter()) {
            let d = d.max(1);
            *c = rest % d;
            rest /= d;
        }
        let pos = Position {
            linear: i,
            coords: &coords,
        };
        unsafe { self.accesses.apply(&*self.f, &pos) }
    }
}

impl<F, Args, R> Operand for Broadcasted<F, Args, R>
where
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
{
    type Item = R;
    type Access = BroadcastAccess<F, Args::Accesses, R>;

    fn access(&self, dest_dims: &[usize]) -> Result<Self::Access> {
        Ok(BroadcastAccess {
            f: &self.f,
            accesses: self.args.accesses(dest_dims)?,
            dims: Dims::from_slice(dest_dims),
            _output: PhantomData,
        })
    }

    fn flat_access(&self) -> Result<Self::Access> {
        Ok(BroadcastAccess {
            f: &self.f,
            accesses: self.args.accesses(&self.dims)?,
            dims: self.dims.clone(),
            _output: PhantomData,
        })
    }
}
