use std::fmt::Display;

/// Value range of an integer node, in signed interpretation of `bits` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerStamp {
	pub bits: u32,
	pub lower: i64,
	pub upper: i64,
}

/// Wraps `value` into the signed range of `bits` bits.
pub fn wrap(bits: u32, value: i128) -> i64 {
	if bits >= 64 {
		return value as i64;
	}
	let shift = 128 - bits;
	((value << shift) >> shift) as i64
}

impl IntegerStamp {
	pub fn min_value(bits: u32) -> i64 {
		if bits >= 64 {
			i64::MIN
		} else {
			-(1i64 << (bits - 1))
		}
	}

	pub fn max_value(bits: u32) -> i64 {
		if bits >= 64 {
			i64::MAX
		} else {
			(1i64 << (bits - 1)) - 1
		}
	}

	pub fn unrestricted(bits: u32) -> Self {
		Self {
			bits,
			lower: Self::min_value(bits),
			upper: Self::max_value(bits),
		}
	}

	pub fn new(bits: u32, lower: i64, upper: i64) -> Self {
		assert!(lower <= upper, "empty stamp [{}, {}]", lower, upper);
		Self {
			bits,
			lower: lower.max(Self::min_value(bits)),
			upper: upper.min(Self::max_value(bits)),
		}
	}

	pub fn constant(bits: u32, value: i64) -> Self {
		let value = wrap(bits, value as i128);
		Self {
			bits,
			lower: value,
			upper: value,
		}
	}

	/// Range from a wide computation; anything that may overflow `bits`
	/// becomes unrestricted.
	pub fn from_wide(bits: u32, lower: i128, upper: i128) -> Self {
		if lower >= Self::min_value(bits) as i128
			&& upper <= Self::max_value(bits) as i128
		{
			Self {
				bits,
				lower: lower as i64,
				upper: upper as i64,
			}
		} else {
			Self::unrestricted(bits)
		}
	}

	pub fn as_constant(&self) -> Option<i64> {
		(self.lower == self.upper).then_some(self.lower)
	}

	pub fn is_strictly_positive(&self) -> bool {
		self.lower > 0
	}

	pub fn is_strictly_negative(&self) -> bool {
		self.upper < 0
	}

	pub fn is_non_negative(&self) -> bool {
		self.lower >= 0
	}

	pub fn contains(&self, value: i64) -> bool {
		self.lower <= value && value <= self.upper
	}

	pub fn is_unrestricted(&self) -> bool {
		*self == Self::unrestricted(self.bits)
	}

	pub fn union(&self, other: &Self) -> Self {
		Self {
			bits: self.bits.max(other.bits),
			lower: self.lower.min(other.lower),
			upper: self.upper.max(other.upper),
		}
	}

	pub fn add(&self, other: &Self) -> Self {
		Self::from_wide(
			self.bits,
			self.lower as i128 + other.lower as i128,
			self.upper as i128 + other.upper as i128,
		)
	}

	pub fn sub(&self, other: &Self) -> Self {
		Self::from_wide(
			self.bits,
			self.lower as i128 - other.upper as i128,
			self.upper as i128 - other.lower as i128,
		)
	}

	pub fn mul(&self, other: &Self) -> Self {
		let products = [
			self.lower as i128 * other.lower as i128,
			self.lower as i128 * other.upper as i128,
			self.upper as i128 * other.lower as i128,
			self.upper as i128 * other.upper as i128,
		];
		let lower = products.iter().copied().min().unwrap_or(0);
		let upper = products.iter().copied().max().unwrap_or(0);
		Self::from_wide(self.bits, lower, upper)
	}

	pub fn negate(&self) -> Self {
		Self::from_wide(self.bits, -(self.upper as i128), -(self.lower as i128))
	}

	pub fn shl(&self, other: &Self) -> Self {
		match other.as_constant() {
			Some(shift) if shift >= 0 && (shift as u32) < self.bits => {
				let factor = 1i128 << shift;
				Self::from_wide(
					self.bits,
					self.lower as i128 * factor,
					self.upper as i128 * factor,
				)
			}
			_ => Self::unrestricted(self.bits),
		}
	}

	/// Bitwise ops only keep precision for non-negative operands.
	pub fn bitwise(&self, other: &Self, is_and: bool) -> Self {
		if !self.is_non_negative() || !other.is_non_negative() {
			return Self::unrestricted(self.bits);
		}
		if is_and {
			return Self::new(self.bits, 0, self.upper.min(other.upper));
		}
		let max = self.upper.max(other.upper) as u64;
		let mask = if max == 0 {
			0
		} else {
			u64::MAX >> max.leading_zeros()
		};
		Self::new(self.bits, 0, mask as i64)
	}

	pub fn sign_extend(&self, bits: u32) -> Self {
		Self {
			bits,
			lower: self.lower,
			upper: self.upper,
		}
	}

	pub fn zero_extend(&self, bits: u32) -> Self {
		if self.is_non_negative() || self.bits >= 64 {
			Self::new(bits, self.lower.max(0), self.upper)
		} else {
			Self::new(bits, 0, ((1i128 << self.bits) - 1) as i64)
		}
	}

	pub fn narrow(&self, bits: u32) -> Self {
		Self::from_wide(bits, self.lower as i128, self.upper as i128)
	}
}

impl Display for IntegerStamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.is_unrestricted() {
			write!(f, "i{}", self.bits)
		} else {
			write!(f, "i{}[{}, {}]", self.bits, self.lower, self.upper)
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
	Void,
	Logic,
	Int(IntegerStamp),
}

impl Stamp {
	pub fn int(bits: u32) -> Self {
		Stamp::Int(IntegerStamp::unrestricted(bits))
	}

	pub fn as_int(&self) -> Option<&IntegerStamp> {
		match self {
			Stamp::Int(stamp) => Some(stamp),
			_ => None,
		}
	}

	pub fn bits(&self) -> u32 {
		match self {
			Stamp::Int(stamp) => stamp.bits,
			Stamp::Logic => 1,
			Stamp::Void => 0,
		}
	}

	/// Same kind of value with no range knowledge.
	pub fn unrestricted(&self) -> Self {
		match self {
			Stamp::Int(stamp) => Stamp::int(stamp.bits),
			other => *other,
		}
	}
}

impl Display for Stamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Stamp::Void => write!(f, "void"),
			Stamp::Logic => write!(f, "logic"),
			Stamp::Int(stamp) => write!(f, "{}", stamp),
		}
	}
}

#[cfg(test)]
mod tests {
	use rand::{rngs::StdRng, Rng, SeedableRng};
	use test_log::test;

	use super::*;

	fn random_stamp(rng: &mut StdRng, bits: u32) -> IntegerStamp {
		let min = IntegerStamp::min_value(bits);
		let max = IntegerStamp::max_value(bits);
		let a = rng.gen_range(min..=max);
		let b = rng.gen_range(min..=max);
		IntegerStamp::new(bits, a.min(b), a.max(b))
	}

	#[test]
	fn results_stay_inside_inferred_stamps() {
		let mut rng = StdRng::seed_from_u64(3);
		for bits in [8, 16, 32] {
			for _ in 0..200 {
				let x = random_stamp(&mut rng, bits);
				let y = random_stamp(&mut rng, bits);
				let a = rng.gen_range(x.lower..=x.upper);
				let b = rng.gen_range(y.lower..=y.upper);
				let (a, b) = (a as i128, b as i128);
				assert!(x.add(&y).contains(wrap(bits, a + b)), "{:?} + {:?}", x, y);
				assert!(x.sub(&y).contains(wrap(bits, a - b)), "{:?} - {:?}", x, y);
				assert!(x.mul(&y).contains(wrap(bits, a * b)), "{:?} * {:?}", x, y);
				assert!(x.negate().contains(wrap(bits, -a)), "-{:?}", x);
			}
		}
	}

	#[test]
	fn wrap_to_width() {
		assert_eq!(wrap(8, 127), 127);
		assert_eq!(wrap(8, 128), -128);
		assert_eq!(wrap(8, -129), 127);
		assert_eq!(wrap(32, i32::MAX as i128 + 1), i32::MIN as i64);
		assert_eq!(wrap(64, -1), -1);
	}

	#[test]
	fn arithmetic_overflow_widens() {
		let a = IntegerStamp::new(8, 100, 120);
		let b = IntegerStamp::new(8, 1, 5);
		assert_eq!(a.add(&b), IntegerStamp::new(8, 101, 125));
		assert!(a.add(&a).is_unrestricted());
		assert_eq!(a.sub(&b), IntegerStamp::new(8, 95, 119));
		assert_eq!(b.mul(&IntegerStamp::constant(8, -3)), IntegerStamp::new(8, -15, -3));
		assert_eq!(b.negate(), IntegerStamp::new(8, -5, -1));
		assert!(IntegerStamp::unrestricted(8).negate().is_unrestricted());
	}

	#[test]
	fn conversions() {
		let a = IntegerStamp::new(8, -3, 7);
		assert_eq!(a.sign_extend(32), IntegerStamp::new(32, -3, 7));
		assert_eq!(a.zero_extend(32), IntegerStamp::new(32, 0, 255));
		let b = IntegerStamp::new(8, 2, 7);
		assert_eq!(b.zero_extend(32), IntegerStamp::new(32, 2, 7));
		assert!(IntegerStamp::new(32, 0, 1000).narrow(8).is_unrestricted());
		assert_eq!(b.shl(&IntegerStamp::constant(8, 2)), IntegerStamp::new(8, 8, 28));
		assert_eq!(
			IntegerStamp::new(8, 0, 5).bitwise(&IntegerStamp::new(8, 0, 9), false),
			IntegerStamp::new(8, 0, 15)
		);
	}
}
