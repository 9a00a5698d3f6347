//! Two identically sized buffers alternating between "source" (the latest
//! completed generation) and "destination" (what the next step writes).

use rand::distr::Uniform;
use rand::Rng;

use super::buffer::{BufferKind, DeviceBuffer, Scalar};
use super::error::ResourceError;
use super::program::GpuProgram;
use super::render_context::RenderContext;

/// Binding point the source buffer is attached at.
pub const READ_POINT: u32 = 0;
/// Binding point the destination buffer is attached at.
pub const WRITE_POINT: u32 = 1;

/// Which buffer currently holds the latest generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Buffer A is the source.
    #[default]
    AIsSource,
    /// Buffer B is the source.
    BIsSource,
}

/// The role flag on its own. Flips on every unpaused step; `reset`
/// returns it to [`Role::AIsSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingPong {
    role: Role,
}

impl PingPong {
    /// Current role.
    pub fn role(self) -> Role {
        self.role
    }

    /// Role for this step, flipping for the next one unless `paused`.
    pub fn advance(&mut self, paused: bool) -> Role {
        let current = self.role;
        if !paused {
            self.role = match current {
                Role::AIsSource => Role::BIsSource,
                Role::BIsSource => Role::AIsSource,
            };
        }
        current
    }

    /// Back to A-is-source.
    pub fn reset(&mut self) {
        self.role = Role::AIsSource;
    }
}

/// How `resize` fills values past the old length.
#[derive(Debug, Clone, PartialEq)]
pub enum FillPolicy {
    /// Uniform random values in `[min, max)`. When no such distribution
    /// exists (empty range, non-finite bounds, or a width that overflows)
    /// the fill is `min`, or zero if `min` itself is not finite.
    Random {
        /// Lower bound.
        min: Scalar,
        /// Upper bound (exclusive).
        max: Scalar,
    },
    /// The pattern repeated (e.g. one particle's `x, y`). An empty pattern
    /// fills zeros.
    Fixed(Vec<Scalar>),
}

/// `old` truncated or extended to `new_len` values according to `policy`.
pub fn resize_values(
    old: &[Scalar],
    new_len: usize,
    policy: &FillPolicy,
    rng: &mut impl Rng,
) -> Vec<Scalar> {
    let mut values = Vec::with_capacity(new_len);
    values.extend_from_slice(&old[..old.len().min(new_len)]);
    let missing = new_len - values.len();
    match policy {
        FillPolicy::Random { min, max } => match Uniform::new(*min, *max) {
            Ok(range) => values.extend((0..missing).map(|_| rng.sample(&range))),
            // Empty, non-finite, or overflowing bounds.
            Err(_) => values.resize(new_len, if min.is_finite() { *min } else { 0.0 }),
        },
        FillPolicy::Fixed(pattern) if pattern.is_empty() => values.resize(new_len, 0.0),
        FillPolicy::Fixed(pattern) => {
            values.extend(pattern.iter().copied().cycle().take(missing));
        }
    }
    values
}

/// A pair of storage buffers holding `count × components` scalars each.
///
/// Outside a dispatch both buffers hold valid data: seeding and resizing
/// write the same values into both.
#[derive(Debug)]
pub struct DoubleBuffer {
    a: DeviceBuffer,
    b: DeviceBuffer,
    components: usize,
    roles: PingPong,
    label: String,
}

impl DoubleBuffer {
    /// Pair for `count` items of `components` scalars; no device memory
    /// until [`init`](Self::init).
    pub fn new(label: &str, count: usize, components: usize) -> Self {
        let (a, b) = Self::pair(label, count * components);
        Self {
            a,
            b,
            components,
            roles: PingPong::default(),
            label: label.to_owned(),
        }
    }

    fn pair(label: &str, len: usize) -> (DeviceBuffer, DeviceBuffer) {
        (
            DeviceBuffer::new(&format!("{label} A"), len, BufferKind::Storage),
            DeviceBuffer::new(&format!("{label} B"), len, BufferKind::Storage),
        )
    }

    /// Allocate both buffers.
    pub fn init(&mut self, context: &RenderContext) {
        self.a.init(context);
        self.b.init(context);
    }

    /// Upload `values` into both buffers.
    ///
    /// # Errors
    ///
    /// [`ResourceError::LengthMismatch`] unless `values` has exactly
    /// `count × components` elements; nothing is written then.
    pub fn seed(&self, context: &RenderContext, values: &[Scalar]) -> Result<(), ResourceError> {
        self.a.upload(context, values)?;
        self.b.upload(context, values)
    }

    /// Attach the source to `read_block` and the destination to
    /// `write_block`, then flip roles unless `paused`.
    ///
    /// # Errors
    ///
    /// Binding failures from the program; roles are unchanged then.
    pub fn step_bindings<P: GpuProgram>(
        &mut self,
        program: &mut P,
        read_block: &str,
        write_block: &str,
        paused: bool,
    ) -> Result<(), ResourceError> {
        let (source, destination) = self.buffers(self.roles.role());
        program.bind_buffer(read_block, source, READ_POINT)?;
        program.bind_buffer(write_block, destination, WRITE_POINT)?;
        let _ = self.roles.advance(paused);
        Ok(())
    }

    /// Change the item count to `new_count`, keeping the leading items of
    /// the current source and filling the rest per `policy`. Both new
    /// buffers are seeded with the result and A becomes the source.
    ///
    /// # Errors
    ///
    /// Readback failures; the old buffers are kept then.
    pub fn resize(
        &mut self,
        context: &RenderContext,
        new_count: usize,
        policy: &FillPolicy,
        rng: &mut impl Rng,
    ) -> Result<(), ResourceError> {
        let old = self.source().download(context)?;
        let values = resize_values(&old, new_count * self.components, policy, rng);
        self.replace(context, &values)?;
        log::debug!(
            "{}: resized {} -> {new_count} items",
            self.label,
            old.len() / self.components.max(1)
        );
        Ok(())
    }

    /// Release both buffers, allocate new ones sized to `values`, and seed
    /// them with it.
    ///
    /// # Errors
    ///
    /// `values.len()` not a multiple of the component count.
    pub fn replace(&mut self, context: &RenderContext, values: &[Scalar]) -> Result<(), ResourceError> {
        if self.components == 0 || values.len() % self.components != 0 {
            return Err(ResourceError::LengthMismatch {
                label: self.label.clone(),
                expected: values.len().next_multiple_of(self.components.max(1)),
                actual: values.len(),
            });
        }
        self.release();
        let (a, b) = Self::pair(&self.label, values.len());
        self.a = a;
        self.b = b;
        self.init(context);
        self.roles.reset();
        self.seed(context, values)
    }

    /// Buffer holding the latest completed generation.
    pub fn source(&self) -> &DeviceBuffer {
        self.buffers(self.roles.role()).0
    }

    /// Buffer the next step writes.
    pub fn destination(&self) -> &DeviceBuffer {
        self.buffers(self.roles.role()).1
    }

    /// Buffer A, regardless of role.
    pub fn buffer_a(&self) -> &DeviceBuffer {
        &self.a
    }

    /// Buffer B, regardless of role.
    pub fn buffer_b(&self) -> &DeviceBuffer {
        &self.b
    }

    /// Current role.
    pub fn role(&self) -> Role {
        self.roles.role()
    }

    /// Item count.
    pub fn count(&self) -> usize {
        self.a.len() / self.components.max(1)
    }

    /// Scalars per item.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Free both allocations together.
    pub fn release(&mut self) {
        self.a.release();
        self.b.release();
    }

    fn buffers(&self, role: Role) -> (&DeviceBuffer, &DeviceBuffer) {
        match role {
            Role::AIsSource => (&self.a, &self.b),
            Role::BIsSource => (&self.b, &self.a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn paused_steps_keep_the_role() {
        let mut roles = PingPong::default();
        for _ in 0..5 {
            assert_eq!(roles.advance(true), Role::AIsSource);
        }
        assert_eq!(roles.role(), Role::AIsSource);
    }

    #[test]
    fn unpaused_steps_alternate() {
        let mut roles = PingPong::default();
        let seen: Vec<_> = (0..4).map(|_| roles.advance(false)).collect();
        assert_eq!(
            seen,
            vec![Role::AIsSource, Role::BIsSource, Role::AIsSource, Role::BIsSource]
        );
        roles.reset();
        assert_eq!(roles.role(), Role::AIsSource);
    }

    #[test]
    fn growing_with_fixed_fill_repeats_the_pattern() {
        let old = [1.0, 2.0, 3.0, 4.0];
        let grown = resize_values(&old, 10, &FillPolicy::Fixed(vec![7.0, 8.0]), &mut rng());
        assert_eq!(grown, vec![1.0, 2.0, 3.0, 4.0, 7.0, 8.0, 7.0, 8.0, 7.0, 8.0]);
    }

    #[test]
    fn shrinking_keeps_the_prefix() {
        let old = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let shrunk = resize_values(&old, 2, &FillPolicy::Fixed(vec![0.0, 0.0]), &mut rng());
        assert_eq!(shrunk, vec![1.0, 2.0]);
        assert!(resize_values(&old, 0, &FillPolicy::Fixed(Vec::new()), &mut rng()).is_empty());
    }

    #[test]
    fn random_fill_stays_in_range() {
        let policy = FillPolicy::Random { min: -9.0, max: 9.0 };
        let grown = resize_values(&[0.5; 4], 604, &policy, &mut rng());
        assert_eq!(grown.len(), 604);
        assert_eq!(grown[..4], [0.5; 4]);
        assert!(grown[4..].iter().all(|v| (-9.0..9.0).contains(v)));
    }

    #[test]
    fn unbounded_random_range_falls_back_instead_of_panicking() {
        let infinite = FillPolicy::Random {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        };
        assert_eq!(resize_values(&[], 2, &infinite, &mut rng()), vec![0.0; 2]);

        let overflowing = FillPolicy::Random {
            min: -f32::MAX,
            max: f32::MAX,
        };
        assert_eq!(
            resize_values(&[1.0], 3, &overflowing, &mut rng()),
            vec![1.0, -f32::MAX, -f32::MAX]
        );

        let nan = FillPolicy::Random {
            min: f32::NAN,
            max: 1.0,
        };
        assert_eq!(resize_values(&[], 2, &nan, &mut rng()), vec![0.0; 2]);
    }

    #[test]
    fn empty_random_range_fills_with_min() {
        let policy = FillPolicy::Random { min: 3.0, max: 3.0 };
        assert_eq!(resize_values(&[], 3, &policy, &mut rng()), vec![3.0; 3]);
    }

    #[test]
    fn new_pair_reports_count_and_roles() {
        let buffers = DoubleBuffer::new("particles", 300, 2);
        assert_eq!(buffers.count(), 300);
        assert_eq!(buffers.source().len(), 600);
        assert_eq!(buffers.role(), Role::AIsSource);
        assert!(std::ptr::eq(buffers.source(), buffers.buffer_a()));
        assert!(std::ptr::eq(buffers.destination(), buffers.buffer_b()));
    }
}
