use super::QueryTransformation;
use crate::models::RequestOptions;

/// Builds the transformation list for a read, in fixed order:
/// page, omit, order, equality filters, range filter, preloads, then `extra`.
///
/// The effective page size is `options.limit` when `0 < limit <= limit_max`,
/// and `limit_max` otherwise. The offset passes through unclamped.
/// `extra` goes last so a route scope cannot be overridden by the request.
#[must_use]
pub fn compose(
    options: &RequestOptions,
    limit_max: i64,
    omit: &[String],
    extra: Option<QueryTransformation>,
) -> Vec<QueryTransformation> {
    let limit = if options.limit > 0 && options.limit <= limit_max {
        options.limit
    } else {
        limit_max
    };

    let mut query = vec![QueryTransformation::page(limit, options.offset)];

    if !omit.is_empty() {
        query.push(QueryTransformation::Omit(omit.to_vec()));
    }

    if !options.order_by.is_empty() {
        query.push(QueryTransformation::order_by(
            options.order_by.clone(),
            options.descending,
        ));
    }

    push_conditions(&mut query, options);

    for path in options.preload.iter().filter(|path| !path.is_empty()) {
        query.push(QueryTransformation::preload(path.clone()));
    }

    query.extend(extra);
    query
}

/// The filter-relevant subset of [`compose`] used for counts: equality
/// filters, range filter and `extra`. No pagination, ordering or preload.
#[must_use]
pub fn compose_filters(
    options: &RequestOptions,
    extra: Option<QueryTransformation>,
) -> Vec<QueryTransformation> {
    let mut query = Vec::new();
    push_conditions(&mut query, options);
    query.extend(extra);
    query
}

fn push_conditions(query: &mut Vec<QueryTransformation>, options: &RequestOptions) {
    for (field, value) in &options.filters {
        if !field.is_empty() && !value.is_empty() {
            query.push(QueryTransformation::filter_by(field.clone(), value.clone()));
        }
    }

    // Anything but exactly two bounds is ignored.
    if let [from, to] = options.filters_at.as_slice() {
        query.push(QueryTransformation::filter_at(from.clone(), to.clone()));
    }
}
