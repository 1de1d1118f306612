pub mod math {
    pub mod column_matrix;
    pub mod sparse_indexed_vector;
    pub mod sparse_vector_pool;
}
pub mod optimisation_algorithms {
    pub mod dual_simplex;
    pub mod dual_simplex_bound_flips;
    pub mod dual_simplex_config;
    pub mod dual_simplex_events;
    pub mod dual_simplex_factorization;
    pub mod dual_simplex_fake_bounds;
    pub mod dual_simplex_lu;
    pub mod dual_simplex_parallel;
    pub mod dual_simplex_pricing;
    pub mod dual_simplex_ratio_test;
    pub mod dual_simplex_recovery;
    pub mod dual_simplex_variables;
    pub mod linear_programming;
}
