use std::collections::HashMap;

use num_bigint::BigUint;

use super::{Bdd, Ref};

impl Bdd {
    /// Returns one satisfying partial assignment as DIMACS literals, if any.
    pub fn one_sat(&self, node: Ref) -> Option<Vec<i32>> {
        if self.is_zero(node) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = node;
        while !self.is_one(current) {
            let var = self.variable(current) as i32;
            let high = self.high_node(current);
            if !self.is_zero(high) {
                path.push(var);
                current = high;
            } else {
                path.push(-var);
                current = self.low_node(current);
            }
        }
        Some(path)
    }

    /// All paths to the `one` terminal, each as a cube of DIMACS literals.
    ///
    /// The number of paths can be exponential in the number of variables.
    pub fn cubes(&self, node: Ref) -> Vec<Vec<i32>> {
        let mut result = Vec::new();
        let mut path = Vec::new();
        self.cubes_(node, &mut path, &mut result);
        result
    }

    fn cubes_(&self, node: Ref, path: &mut Vec<i32>, result: &mut Vec<Vec<i32>>) {
        if self.is_zero(node) {
            return;
        }
        if self.is_one(node) {
            result.push(path.clone());
            return;
        }
        let var = self.variable(node) as i32;
        path.push(-var);
        self.cubes_(self.low_node(node), path, result);
        path.pop();
        path.push(var);
        self.cubes_(self.high_node(node), path, result);
        path.pop();
    }

    /// Number of satisfying assignments over `num_vars` variables.
    pub fn sat_count(&self, node: Ref, num_vars: usize) -> BigUint {
        let max = BigUint::from(1u32) << num_vars;
        let mut cache = HashMap::new();
        self.sat_count_(node, &max, &mut cache)
    }

    fn sat_count_(&self, node: Ref, max: &BigUint, cache: &mut HashMap<Ref, BigUint>) -> BigUint {
        if self.is_zero(node) {
            return BigUint::from(0u32);
        }
        if self.is_one(node) {
            return max.clone();
        }
        let regular = if node.is_negated() { -node } else { node };
        let count = if let Some(count) = cache.get(&regular) {
            count.clone()
        } else {
            let low = self.sat_count_(self.low_node(regular), max, cache);
            let high = self.sat_count_(self.high_node(regular), max, cache);
            let count: BigUint = (low + high) >> 1;
            cache.insert(regular, count.clone());
            count
        };
        if node.is_negated() {
            max - count
        } else {
            count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_sat() {
        let bdd = Bdd::default();
        let f = bdd.cube([1, -2, -3]);
        let model = bdd.one_sat(f).unwrap();
        assert_eq!(model, vec![1, -2, -3]);

        let g = bdd.apply_and(f, -bdd.cube(model));
        assert_eq!(bdd.one_sat(g), None);
    }

    #[test]
    fn test_cubes_of_xor() {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_xor(x, y);
        let cubes = bdd.cubes(f);
        assert_eq!(cubes.len(), 2);
        let rebuilt = bdd.or_many(cubes.into_iter().map(|c| bdd.cube(c)));
        assert_eq!(rebuilt, f);
    }

    #[test]
    fn test_sat_count() {
        let bdd = Bdd::default();
        let f = bdd.cube([1, 2]);
        assert_eq!(bdd.sat_count(f, 2), BigUint::from(1u32));
        assert_eq!(bdd.sat_count(f, 4), BigUint::from(4u32));
        assert_eq!(bdd.sat_count(-f, 2), BigUint::from(3u32));
        assert_eq!(bdd.sat_count(bdd.one(), 3), BigUint::from(8u32));
        assert_eq!(bdd.sat_count(bdd.zero(), 3), BigUint::from(0u32));
    }
}
