use crate::core::RatingId;
use crate::ratings::model::{Rating, SequenceLinks};

/// Ratings of one query, each linked to its neighbours.
/// The first has no predecessor and the last no successor.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    ratings: Vec<Rating>,
}

impl ResultSet {
    pub fn new(mut ratings: Vec<Rating>) -> Self {
        let ids: Vec<Option<RatingId>> = ratings.iter().map(|rating| rating.id).collect();
        for (position, rating) in ratings.iter_mut().enumerate() {
            rating.sequence = Some(SequenceLinks {
                prev: position
                    .checked_sub(1)
                    .and_then(|prev| ids.get(prev).copied().flatten()),
                next: ids.get(position + 1).copied().flatten(),
            });
        }
        Self { ratings }
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rating> {
        self.ratings.iter()
    }

    pub fn first(&self) -> Option<&Rating> {
        self.ratings.first()
    }

    pub fn get(&self, id: RatingId) -> Option<&Rating> {
        self.ratings.iter().find(|rating| rating.id == Some(id))
    }

    pub fn prev_of(&self, rating: &Rating) -> Option<&Rating> {
        self.neighbour(rating, |links| links.prev)
    }

    pub fn next_of(&self, rating: &Rating) -> Option<&Rating> {
        self.neighbour(rating, |links| links.next)
    }

    pub fn ids(&self) -> Vec<RatingId> {
        self.ratings.iter().filter_map(|rating| rating.id).collect()
    }

    pub fn into_vec(self) -> Vec<Rating> {
        self.ratings
    }

    fn neighbour(&self, rating: &Rating, pick: impl Fn(&SequenceLinks) -> Option<RatingId>) -> Option<&Rating> {
        let links = rating.sequence.as_ref()?;
        self.get(pick(links)?)
    }
}

impl IntoIterator for ResultSet {
    type Item = Rating;
    type IntoIter = std::vec::IntoIter<Rating>;

    fn into_iter(self) -> Self::IntoIter {
        self.ratings.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Rating;
    type IntoIter = std::slice::Iter<'a, Rating>;

    fn into_iter(self) -> Self::IntoIter {
        self.ratings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CollectionId, ElementId};

    fn rating(id: i64) -> Rating {
        let mut rating = Rating::new(CollectionId::new(1), ElementId::new(1));
        rating.id = Some(RatingId::new(id));
        rating
    }

    #[test]
    fn test_sequence_links() {
        let results = ResultSet::new(vec![rating(7), rating(3), rating(9)]);
        let links: Vec<_> = results.iter().map(|r| r.sequence.unwrap()).collect();

        assert_eq!(links[0], SequenceLinks { prev: None, next: Some(RatingId::new(3)) });
        assert_eq!(
            links[1],
            SequenceLinks { prev: Some(RatingId::new(7)), next: Some(RatingId::new(9)) }
        );
        assert_eq!(links[2], SequenceLinks { prev: Some(RatingId::new(3)), next: None });

        let middle = results.get(RatingId::new(3)).unwrap();
        assert_eq!(results.next_of(middle).and_then(|r| r.id), Some(RatingId::new(9)));
        assert_eq!(results.prev_of(middle).and_then(|r| r.id), Some(RatingId::new(7)));
        assert!(results.prev_of(results.first().unwrap()).is_none());
    }

    #[test]
    fn test_single_result_has_no_neighbours() {
        let results = ResultSet::new(vec![rating(1)]);
        assert_eq!(results.first().unwrap().sequence, Some(SequenceLinks::default()));
        assert_eq!(results.ids(), vec![RatingId::new(1)]);
    }
}
