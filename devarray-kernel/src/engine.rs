//! Elementwise execution engine.
//!
//! Every entry point validates its inputs, lowers the operands, negotiates a
//! launch with the backend and submits exactly one dispatch. Failures found
//! before the dispatch never reach the backend.
//!
//! Broadcast evaluation requires the destination to match the expression's
//! shape exactly. `map` is looser: operands of differing shapes are read as
//! flat column-major sequences and the result is truncated to the shortest.

use std::marker::PhantomData;

use tracing::{debug, trace};

use devarray_traits::{check_element, BackendHandle, DeviceError, Element, Kernel, Result};
use devarray_traits::{ExecutionContext, LaunchConfig};
use devarray_view::layout::{total_len, Dims, Strides};
use devarray_view::{common_backend, DeviceArray, DeviceResidentMut, IndexStyle, Scalar};

use crate::broadcast::{AccessTuple, Apply, Broadcasted, Operands};
use crate::indexing::{CartesianTable, IndexingStrategy};
use crate::launch::negotiate;
use crate::operand::Position;

// ============================================================================
// Destination writer
// ============================================================================

/// Kernel-side writer for the destination.
struct DestAccess<T> {
    ptr: *mut T,
    offset: usize,
    dims: Dims,
    strides: Strides,
    style: IndexStyle,
}

// SAFETY: each logical index is written by exactly one thread slot.
unsafe impl<T: Send> Send for DestAccess<T> {}
unsafe impl<T: Send> Sync for DestAccess<T> {}

impl<T: Element> DestAccess<T> {
    fn new<D: DeviceResidentMut<Elem = T> + ?Sized>(dest: &mut D) -> Self {
        let layout = dest.layout();
        let offset = layout.offset();
        let dims = Dims::from_slice(layout.dims());
        let strides = Strides::from_slice(layout.strides());
        let style = layout.index_style();
        Self {
            ptr: dest.as_mut_ptr(),
            offset,
            dims,
            strides,
            style,
        }
    }

    #[inline]
    unsafe fn store(&self, pos: &Position<'_>, value: T) {
        let off = match self.style {
            IndexStyle::Linear => pos.linear as isize,
            IndexStyle::Cartesian => pos
                .coords
                .iter()
                .zip(self.strides.iter())
                .map(|(&c, &s)| c as isize * s)
                .sum(),
        };
        unsafe { *self.ptr.offset(self.offset as isize + off) = value }
    }

    #[inline]
    unsafe fn store_flat(&self, i: usize, value: T) {
        let off = match self.style {
            IndexStyle::Linear => i as isize,
            IndexStyle::Cartesian => {
                let mut rest = i;
                let mut off = 0isize;
                for (&d, &s) in self.dims.iter().zip(self.strides.iter()) {
                    off += (rest % d) as isize * s;
                    rest /= d;
                }
                off
            }
        };
        unsafe { *self.ptr.offset(self.offset as isize + off) = value }
    }
}

// ============================================================================
// Kernels
// ============================================================================

/// Same-shape broadcast body: one element per logical index of the launch.
struct BroadcastKernel<'a, F, Acc, R> {
    f: &'a F,
    args: Acc,
    dest: DestAccess<R>,
    len: usize,
    table: Option<CartesianTable>,
}

impl<F, Acc, R> Kernel for BroadcastKernel<'_, F, Acc, R>
where
    F: Sync,
    Acc: Apply<F, R>,
    R: Element,
{
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn execute(&self, ctx: &ExecutionContext) {
        for local in 0..ctx.quota {
            let i = ctx.linear_index(local);
            if i >= self.len {
                return;
            }
            let coords = match &self.table {
                // SAFETY: `i < len` and the table covers the launch shape.
                Some(table) => unsafe { table.get_unchecked(i) },
                None => &[],
            };
            let pos = Position { linear: i, coords };
            // SAFETY: operands and destination outlive the synchronous
            // dispatch, and `pos` lies inside the launch shape.
            unsafe {
                let value = self.args.apply(self.f, &pos);
                self.dest.store(&pos, value);
            }
        }
    }
}

/// Flat map body: element `i` of every operand and of the destination.
struct MapKernel<'a, F, Acc, R> {
    f: &'a F,
    args: Acc,
    dest: DestAccess<R>,
    len: usize,
    _output: PhantomData<fn() -> R>,
}

impl<F, Acc, R> Kernel for MapKernel<'_, F, Acc, R>
where
    F: Sync,
    Acc: Apply<F, R>,
    R: Element,
{
    fn name(&self) -> &'static str {
        "map"
    }

    fn execute(&self, ctx: &ExecutionContext) {
        for local in 0..ctx.quota {
            let i = ctx.linear_index(local);
            if i >= self.len {
                return;
            }
            // SAFETY: `i` is below the length of every operand and of the
            // destination.
            unsafe {
                let value = self.args.apply_flat(self.f, i);
                self.dest.store_flat(i, value);
            }
        }
    }
}

fn submit(backend: &BackendHandle, kernel: &dyn Kernel, len: usize) -> Result<LaunchConfig> {
    let config = negotiate(&**backend, kernel, len);
    backend.dispatch(kernel, config)?;
    Ok(config)
}

fn ensure_same_backend(dest: &BackendHandle, expr: &BackendHandle) -> Result<()> {
    if dest.id() != expr.id() {
        return Err(DeviceError::BackendMismatch(dest.id().name(), expr.id().name()));
    }
    Ok(())
}

impl<F, Args, R> Broadcasted<F, Args, R>
where
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
    R: Element,
{
    /// Strategy a launch into a destination of style `dest` would use.
    pub fn indexing_strategy(&self, dest: IndexStyle) -> Result<IndexingStrategy> {
        let args = self.args().accesses(self.dims())?;
        Ok(IndexingStrategy::resolve(dest, args.index_style()))
    }

    fn launch(&self, dest: DestAccess<R>) -> Result<()> {
        let args = self.args().accesses(self.dims())?;
        let strategy = IndexingStrategy::resolve(dest.style, args.index_style());
        let table = match strategy {
            IndexingStrategy::Linear => None,
            IndexingStrategy::Cartesian => Some(CartesianTable::new(self.dims())),
        };
        let len = self.len();
        let kernel = BroadcastKernel {
            f: self.func(),
            args,
            dest,
            len,
            table,
        };
        submit(self.backend(), &kernel, len)?;
        Ok(())
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Evaluate `expr` into a newly allocated array on its backend.
pub fn evaluate_to_new<F, Args, R>(expr: &Broadcasted<F, Args, R>) -> Result<DeviceArray<R>>
where
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
    R: Element,
{
    check_element::<R>()?;
    let mut dest = DeviceArray::new(expr.backend(), expr.dims())?;
    evaluate_into(&mut dest, expr)?;
    Ok(dest)
}

/// Evaluate `expr` into `dest`, whose shape must equal the expression's.
pub fn evaluate_into<D, F, Args, R>(dest: &mut D, expr: &Broadcasted<F, Args, R>) -> Result<()>
where
    D: DeviceResidentMut<Elem = R> + ?Sized,
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
    R: Element,
{
    check_element::<R>()?;
    if dest.dims() != expr.dims() {
        return Err(DeviceError::ShapeMismatch {
            expected: expr.dims().to_vec(),
            got: dest.dims().to_vec(),
        });
    }
    ensure_same_backend(dest.backend(), expr.backend())?;
    if dest.is_empty() {
        trace!(dims = ?expr.dims(), "empty destination, skipping dispatch");
        return Ok(());
    }
    expr.launch(DestAccess::new(dest))
}

/// How a map lays out its traversal.
#[derive(Debug, PartialEq, Eq)]
enum MapPlan {
    /// Every shape agrees: evaluate as a same-shape broadcast.
    SameShape(Dims),
    /// Flat traversal over the shortest length.
    Flat(usize),
}

fn plan_map<'a>(shapes: impl IntoIterator<Item = &'a [usize]>) -> MapPlan {
    let mut shapes = shapes.into_iter();
    let Some(first) = shapes.next() else {
        return MapPlan::Flat(0);
    };
    let mut same = true;
    let mut len = total_len(first);
    for shape in shapes {
        same &= shape == first;
        len = len.min(total_len(shape));
    }
    if same {
        MapPlan::SameShape(Dims::from_slice(first))
    } else {
        MapPlan::Flat(len)
    }
}

/// Apply `f` elementwise over `args`, producing a new array.
///
/// Operands of equal shape give a result of that shape. Otherwise each
/// operand is read as a flat column-major sequence and the result is a
/// vector as long as the shortest operand.
pub fn map<F, Args, R>(f: F, args: Args) -> Result<DeviceArray<R>>
where
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
    R: Element,
{
    check_element::<R>()?;
    let (backend, plan) = {
        let operands = args.classified();
        let backend = common_backend(&operands)?;
        let plan = plan_map(operands.iter().map(|o| o.residency().dims()));
        (backend, plan)
    };
    debug!(?plan, "map");
    match plan {
        MapPlan::SameShape(dims) => {
            evaluate_to_new(&Broadcasted::from_parts(f, args, dims, backend))
        }
        MapPlan::Flat(len) => {
            let mut dest = DeviceArray::new(&backend, &[len])?;
            if len > 0 {
                launch_map(&backend, &f, args.flat_accesses()?, DestAccess::new(&mut dest), len)?;
            }
            Ok(dest)
        }
    }
}

/// Apply `f` elementwise over `args`, writing into `dest`.
///
/// When `dest` and every operand share a shape this is a broadcast.
/// Otherwise all of them are read as flat column-major sequences and only
/// the first `min` length positions of `dest` are written.
pub fn map_into<D, F, Args, R>(f: F, dest: &mut D, args: Args) -> Result<()>
where
    D: DeviceResidentMut<Elem = R> + ?Sized,
    F: Sync,
    Args: Operands,
    Args::Accesses: Apply<F, R>,
    R: Element,
{
    check_element::<R>()?;
    let (backend, plan) = {
        let operands = args.classified();
        let backend = common_backend(&operands)?;
        let shapes = std::iter::once(dest.dims())
            .chain(operands.iter().map(|o| o.residency().dims()));
        (backend, plan_map(shapes))
    };
    ensure_same_backend(dest.backend(), &backend)?;
    debug!(?plan, "map_into");
    match plan {
        MapPlan::SameShape(dims) => {
            evaluate_into(dest, &Broadcasted::from_parts(f, args, dims, backend))
        }
        MapPlan::Flat(0) => {
            trace!("zero common length, skipping dispatch");
            Ok(())
        }
        MapPlan::Flat(len) => {
            launch_map(&backend, &f, args.flat_accesses()?, DestAccess::new(dest), len)
        }
    }
}

fn launch_map<F, Acc, R>(
    backend: &BackendHandle,
    f: &F,
    args: Acc,
    dest: DestAccess<R>,
    len: usize,
) -> Result<()>
where
    F: Sync,
    Acc: Apply<F, R>,
    R: Element,
{
    let kernel = MapKernel {
        f,
        args,
        dest,
        len,
        _output: PhantomData,
    };
    submit(backend, &kernel, len)?;
    Ok(())
}

/// Set every element of `dest` to `value`.
pub fn fill<D>(dest: &mut D, value: D::Elem) -> Result<()>
where
    D: DeviceResidentMut + ?Sized,
{
    let expr = Broadcasted::from_parts(
        |x: D::Elem| x,
        (Scalar(value),),
        Dims::from_slice(dest.dims()),
        dest.backend().clone(),
    );
    evaluate_into(dest, &expr)
}
