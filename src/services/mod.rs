pub mod carts;
pub mod catalog;
pub mod coupons;
pub mod customers;
pub mod numbering;
pub mod orders;
pub mod returns;

use sea_orm::{
    sea_query::{Expr, Func, LikeExpr, SimpleExpr},
    ColumnTrait,
};

/// Case-insensitive substring match that behaves the same on SQLite and
/// PostgreSQL. `%`, `_` and `\` in `needle` match literally.
pub(crate) fn contains_ignore_case<C: ColumnTrait>(column: C, needle: &str) -> SimpleExpr {
    let escaped = needle
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Expr::expr(Func::lower(Expr::col(column.as_column_ref())))
        .like(LikeExpr::new(format!("%{}%", escaped)).escape('\\'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product;
    use sea_orm::{DbBackend, EntityTrait, QueryFilter, QueryTrait};

    #[test]
    fn search_lowers_both_sides_on_postgres() {
        let sql = product::Entity::find()
            .filter(contains_ignore_case(product::Column::Name, "Tee_50%"))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#"LOWER("products"."name") LIKE"#), "{}", sql);
        assert!(sql.contains(r"tee\\_50\\%") || sql.contains(r"tee\_50\%"), "{}", sql);
        assert!(sql.contains("ESCAPE"), "{}", sql);
    }
}
