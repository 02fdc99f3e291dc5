//! Cross-student statistics for a course.
//!
//! [`CourseStatsBuilder`] is a fold: feed it records batch by batch and call
//! [`CourseStatsBuilder::finish`] once the scan is done. It never holds the
//! records themselves.

use serde::Serialize;

use crate::model::{CourseId, CourseProgress};

/// Fixed progress buckets, `[0,25)`, `[25,50)`, `[50,75)`, `[75,100)` and `{100}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProgressBucket {
    #[serde(rename = "0-24")]
    Starting,
    #[serde(rename = "25-49")]
    Quarter,
    #[serde(rename = "50-74")]
    Half,
    #[serde(rename = "75-99")]
    Nearly,
    #[serde(rename = "100")]
    Complete,
}

impl ProgressBucket {
    pub const ALL: [ProgressBucket; 5] = [
        ProgressBucket::Starting,
        ProgressBucket::Quarter,
        ProgressBucket::Half,
        ProgressBucket::Nearly,
        ProgressBucket::Complete,
    ];

    #[must_use]
    pub fn for_progress(progress: u8) -> Self {
        match progress {
            0..25 => ProgressBucket::Starting,
            25..50 => ProgressBucket::Quarter,
            50..75 => ProgressBucket::Half,
            75..100 => ProgressBucket::Nearly,
            _ => ProgressBucket::Complete,
        }
    }

    fn index(self) -> usize {
        match self {
            ProgressBucket::Starting => 0,
            ProgressBucket::Quarter => 1,
            ProgressBucket::Half => 2,
            ProgressBucket::Nearly => 3,
            ProgressBucket::Complete => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStat {
    pub bucket: ProgressBucket,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    pub course_id: CourseId,
    pub total_students: u64,
    pub average_progress: f64,
    /// Fraction of students whose course status is completed, in `[0, 1]`.
    pub completion_rate: f64,
    /// Mean seconds spent per student.
    pub average_time_spent: f64,
    pub distribution: Vec<BucketStat>,
}

impl CourseStats {
    #[must_use]
    pub fn bucket(&self, bucket: ProgressBucket) -> Option<&BucketStat> {
        self.distribution.iter().find(|b| b.bucket == bucket)
    }
}

/// Streaming accumulator behind `getCourseStats`.
#[derive(Debug, Clone, Default)]
pub struct CourseStatsBuilder {
    students: u64,
    completed: u64,
    progress_sum: u64,
    time_spent_sum: u64,
    buckets: [u64; 5],
}

impl CourseStatsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &CourseProgress) {
        self.students += 1;
        if record.status().is_completed() {
            self.completed += 1;
        }
        self.progress_sum += u64::from(record.progress());
        self.time_spent_sum = self.time_spent_sum.saturating_add(record.time_spent_secs());
        self.buckets[ProgressBucket::for_progress(record.progress()).index()] += 1;
    }

    pub fn extend<'a>(&mut self, records: impl IntoIterator<Item = &'a CourseProgress>) {
        for record in records {
            self.add(record);
        }
    }

    #[must_use]
    pub fn students(&self) -> u64 {
        self.students
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self, course_id: CourseId) -> CourseStats {
        let n = self.students;
        let ratio = |num: u64| if n == 0 { 0.0 } else { num as f64 / n as f64 };

        let distribution = ProgressBucket::ALL
            .iter()
            .map(|bucket| {
                let count = self.buckets[bucket.index()];
                BucketStat {
                    bucket: *bucket,
                    count,
                    percentage: round2(ratio(count) * 100.0),
                }
            })
            .collect();

        CourseStats {
            course_id,
            total_students: n,
            average_progress: round2(ratio(self.progress_sum)),
            completion_rate: round4(ratio(self.completed)),
            average_time_spent: round2(ratio(self.time_spent_sum)),
            distribution,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LessonId, UserId};
    use crate::time::fixed_now;

    fn student(user: u64, completed: u64, total: u32, secs: u64) -> CourseProgress {
        let now = fixed_now();
        let mut rec = CourseProgress::new(UserId::new(user), CourseId::new(1), total, now);
        for lesson in 1..=completed {
            rec.complete_lesson(LessonId::new(lesson), None, now);
        }
        if secs > 0 {
            rec.record_time_spent(LessonId::new(1), secs, None, now).unwrap();
        }
        rec
    }

    #[test]
    fn empty_course_yields_zeros() {
        let stats = CourseStatsBuilder::new().finish(CourseId::new(9));

        assert_eq!(stats.total_students, 0);
        assert_eq!(stats.average_progress, 0.0);
        assert_eq!(stats.completion_rate, 0.0);
        assert_eq!(stats.average_time_spent, 0.0);
        assert_eq!(stats.distribution.len(), 5);
        assert!(stats.distribution.iter().all(|b| b.count == 0 && b.percentage == 0.0));
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(ProgressBucket::for_progress(0), ProgressBucket::Starting);
        assert_eq!(ProgressBucket::for_progress(24), ProgressBucket::Starting);
        assert_eq!(ProgressBucket::for_progress(25), ProgressBucket::Quarter);
        assert_eq!(ProgressBucket::for_progress(74), ProgressBucket::Half);
        assert_eq!(ProgressBucket::for_progress(75), ProgressBucket::Nearly);
        assert_eq!(ProgressBucket::for_progress(99), ProgressBucket::Nearly);
        assert_eq!(ProgressBucket::for_progress(100), ProgressBucket::Complete);
    }

    #[test]
    fn aggregates_mixed_cohort() {
        let records = [
            student(1, 0, 3, 0),
            student(2, 1, 3, 60),
            student(3, 3, 3, 120),
        ];
        let mut builder = CourseStatsBuilder::new();
        builder.extend(records.iter());
        let stats = builder.finish(CourseId::new(1));

        assert_eq!(stats.total_students, 3);
        // (0 + 33 + 100) / 3
        assert_eq!(stats.average_progress, 44.33);
        assert_eq!(stats.completion_rate, 0.3333);
        assert_eq!(stats.average_time_spent, 60.0);

        let starting = stats.bucket(ProgressBucket::Starting).unwrap();
        assert_eq!(starting.count, 1);
        assert_eq!(starting.percentage, 33.33);
        assert_eq!(stats.bucket(ProgressBucket::Quarter).unwrap().count, 1);
        assert_eq!(stats.bucket(ProgressBucket::Half).unwrap().count, 0);
        assert_eq!(stats.bucket(ProgressBucket::Complete).unwrap().count, 1);
    }
}
