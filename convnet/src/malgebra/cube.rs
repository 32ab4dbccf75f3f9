use std::ops::{AddAssign, Index, IndexMut, SubAssign};

/// Dense `rows × cols × slices` array of `f64`.
///
/// Storage is column-major inside a slice and slices follow each other, so
/// [`Cube::vectorise`] walks rows fastest, then columns, then slices. Two cubes
/// of the same shape always flatten in matching order, which is what the
/// convolution dot products rely on.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "RawCube")]
pub struct Cube {
    // rows, cols, slices
    shape: (usize, usize, usize),
    data: Vec<f64>,
}

#[derive(serde::Deserialize)]
struct RawCube {
    shape: (usize, usize, usize),
    data: Vec<f64>,
}

impl TryFrom<RawCube> for Cube {
    type Error = String;
    fn try_from(raw: RawCube) -> Result<Self, Self::Error> {
        let expected = raw.shape.0.checked_mul(raw.shape.1)
            .and_then(|n| n.checked_mul(raw.shape.2))
            .ok_or_else(|| format!("cube {:?} is too large", raw.shape))?;
        if raw.data.len() != expected {
            return Err(format!("cube {:?} needs {} values, found {}", raw.shape, expected, raw.data.len()));
        }
        Ok(Cube { shape: raw.shape, data: raw.data })
    }
}

impl Cube {
    pub fn zeros(shape: (usize, usize, usize)) -> Self {
        Self {
            shape: shape,
            data: vec![0.0; shape.0 * shape.1 * shape.2],
        }
    }

    pub fn from_fn<F>(shape: (usize, usize, usize), mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f64,
    {
        let mut cube = Self::zeros(shape);
        for s in 0..shape.2 {
            for c in 0..shape.1 {
                for r in 0..shape.0 {
                    cube[(r, c, s)] = f(r, c, s);
                }
            }
        }
        cube
    }

    /// Builds a cube from nested literals indexed `[slice][row][col]`.
    ///
    /// # Panics
    /// Panics if the rows are ragged or the slices differ in size.
    pub fn from_slices(slices: &[Vec<Vec<f64>>]) -> Self {
        let n_slices = slices.len();
        let n_rows = slices.first().map(|s| s.len()).unwrap_or(0);
        let n_cols = slices.first().and_then(|s| s.first()).map(|r| r.len()).unwrap_or(0);
        slices.iter().for_each(|slice| {
            assert_eq!(slice.len(), n_rows, "ragged slice");
            slice.iter().for_each(|row| assert_eq!(row.len(), n_cols, "ragged row"));
        });
        Self::from_fn((n_rows, n_cols, n_slices), |r, c, s| slices[s][r][c])
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    pub fn n_rows(&self) -> usize {
        self.shape.0
    }

    pub fn n_cols(&self) -> usize {
        self.shape.1
    }

    pub fn n_slices(&self) -> usize {
        self.shape.2
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Flat view in storage order.
    pub fn vectorise(&self) -> &[f64] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.data.iter()
    }

    fn offset(&self, r: usize, c: usize, s: usize) -> usize {
        assert!(
            r < self.shape.0 && c < self.shape.1 && s < self.shape.2,
            "index ({r}, {c}, {s}) out of bounds for cube {:?}",
            self.shape
        );
        r + c * self.shape.0 + s * self.shape.0 * self.shape.1
    }

    /// Copies the rectangular region between two corners, both inclusive.
    pub fn subcube(&self, first: (usize, usize, usize), last: (usize, usize, usize)) -> Cube {
        assert!(
            first.0 <= last.0 && first.1 <= last.1 && first.2 <= last.2,
            "subcube corners {first:?} and {last:?} are inverted"
        );
        assert!(
            last.0 < self.shape.0 && last.1 < self.shape.1 && last.2 < self.shape.2,
            "subcube end {last:?} out of bounds for cube {:?}",
            self.shape
        );
        let shape = (last.0 - first.0 + 1, last.1 - first.1 + 1, last.2 - first.2 + 1);
        Cube::from_fn(shape, |r, c, s| self[(first.0 + r, first.1 + c, first.2 + s)])
    }

    /// Dot product of the two flattened cubes.
    pub fn dot(&self, other: &Cube) -> f64 {
        assert_eq!(self.len(), other.len(), "dot product of unequal lengths");
        self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn map<F>(&self, f: F) -> Cube
    where
        F: Fn(f64) -> f64,
    {
        Cube {
            shape: self.shape,
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    pub fn scaled(&self, k: f64) -> Cube {
        self.map(|v| v * k)
    }

    /// `self += k * other`
    pub fn scaled_add(&mut self, k: f64, other: &Cube) {
        assert_eq!(self.shape, other.shape, "shape mismatch in scaled_add");
        self.data.iter_mut()
            .zip(other.data.iter())
            .for_each(|(a, b)| *a += k * b);
    }

    /// Adds `k * patch` into the region whose first corner is `origin`.
    /// Overlapping calls accumulate.
    pub fn add_scaled_at(&mut self, origin: (usize, usize, usize), k: f64, patch: &Cube) {
        let (ph, pw, pd) = patch.shape;
        assert!(
            origin.0 + ph <= self.shape.0 && origin.1 + pw <= self.shape.1 && origin.2 + pd <= self.shape.2,
            "patch {:?} at {origin:?} does not fit cube {:?}",
            patch.shape,
            self.shape
        );
        for s in 0..pd {
            for c in 0..pw {
                for r in 0..ph {
                    self[(origin.0 + r, origin.1 + c, origin.2 + s)] += k * patch[(r, c, s)];
                }
            }
        }
    }

    /// Fills every element from a generator, in storage order.
    pub fn imbue<F>(&mut self, mut f: F)
    where
        F: FnMut() -> f64,
    {
        self.data.iter_mut().for_each(|v| *v = f());
    }

    pub fn fill_zero(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Rows of one slice, for printing.
    pub fn slice_rows(&self, s: usize) -> Vec<Vec<f64>> {
        (0..self.shape.0)
            .map(|r| (0..self.shape.1).map(|c| self[(r, c, s)]).collect())
            .collect()
    }
}

impl Index<(usize, usize, usize)> for Cube {
    type Output = f64;
    fn index(&self, (r, c, s): (usize, usize, usize)) -> &f64 {
        &self.data[self.offset(r, c, s)]
    }
}

impl IndexMut<(usize, usize, usize)> for Cube {
    fn index_mut(&mut self, (r, c, s): (usize, usize, usize)) -> &mut f64 {
        let idx = self.offset(r, c, s);
        &mut self.data[idx]
    }
}

impl AddAssign<&Cube> for Cube {
    fn add_assign(&mut self, rhs: &Cube) {
        self.scaled_add(1.0, rhs);
    }
}

impl SubAssign<&Cube> for Cube {
    fn sub_assign(&mut self, rhs: &Cube) {
        self.scaled_add(-1.0, rhs);
    }
}
